use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use url::Url;
use validator::ValidateEmail;

const MAX_EMAIL_LENGTH: usize = 254;
const MAX_FILTER_VALUE_LENGTH: usize = 256;
const MAX_COMMENT_LENGTH: usize = 1024;

pub struct InputValidator {
    require_https: bool,
}

impl InputValidator {
    pub fn new(require_https: bool) -> Self {
        Self { require_https }
    }

    /// Generic free-text checks shared by every field sent to the remote.
    pub fn validate_input(&self, input: &str, field_name: &str, max_length: usize) -> AppResult<()> {
        if input.len() > max_length {
            return Err(AppError::validation(
                field_name,
                format!("too long: {} characters (max: {})", input.len(), max_length),
            ));
        }

        if input.contains('\0') {
            return Err(AppError::validation(field_name, "contains null bytes"));
        }

        if input.chars().any(|c| c.is_control() && c != '\n' && c != '\t') {
            return Err(AppError::validation(field_name, "contains invalid control characters"));
        }

        Ok(())
    }

    pub fn validate_email(&self, email: &str, field_name: &str) -> AppResult<()> {
        self.validate_input(email, field_name, MAX_EMAIL_LENGTH)?;

        if email.trim().is_empty() {
            return Err(AppError::validation(field_name, "must not be empty"));
        }
        if !email.trim().validate_email() {
            return Err(AppError::validation(field_name, format!("'{email}' is not a valid email address")));
        }
        Ok(())
    }

    /// Allow-list prefix searches may be a partial address, so only the
    /// generic checks apply.
    pub fn validate_email_prefix(&self, prefix: &str) -> AppResult<()> {
        self.validate_input(prefix, "email", MAX_EMAIL_LENGTH)
    }

    pub fn validate_comment(&self, comment: &str) -> AppResult<()> {
        self.validate_input(comment, "comment", MAX_COMMENT_LENGTH)
    }

    /// Filter lists must not contain blank entries.
    pub fn validate_filter_values(&self, values: &[String], field_name: &str) -> AppResult<()> {
        for value in values {
            if value.trim().is_empty() {
                return Err(AppError::validation(field_name, "must not contain blank values"));
            }
            self.validate_input(value, field_name, MAX_FILTER_VALUE_LENGTH)?;
        }
        Ok(())
    }

    pub fn validate_job_id(&self, job_id: &str) -> AppResult<()> {
        if job_id.is_empty() || job_id.len() > 100 {
            return Err(AppError::validation("id", "must be between 1 and 100 characters"));
        }
        self.validate_input(job_id, "id", 100)
    }

    /// ISO-8601 timestamp as accepted by the account export `since_timestamp`.
    pub fn parse_timestamp(&self, raw: &str, field_name: &str) -> AppResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| AppError::validation(field_name, format!("'{raw}' is not an ISO-8601 timestamp: {e}")))
    }

    /// Result URLs must be absolute http(s) URLs before they are handed out.
    pub fn validate_result_url(&self, url_str: &str) -> AppResult<Url> {
        let url = Url::parse(url_str).map_err(|e| AppError::validation("result_url", format!("invalid URL: {e}")))?;

        match url.scheme() {
            "https" => {}
            "http" if !self.require_https => {}
            scheme => {
                return Err(AppError::validation(
                    "result_url",
                    format!("scheme '{scheme}' is not allowed for download URLs"),
                ))
            }
        }

        if url.host_str().is_none() {
            return Err(AppError::validation("result_url", "URL must have a valid host"));
        }

        Ok(url)
    }
}
