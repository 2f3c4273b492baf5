use validator::ValidationError;

const MAX_CONTENT_LEN: usize = 4000;

pub fn validate_display_name(value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > 64 {
        return Err(ValidationError::new("name_length"));
    }
    Ok(())
}

pub fn validate_phone(value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if trimmed.len() < 7 || trimmed.len() > 20 {
        return Err(ValidationError::new("phone_length"));
    }

    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::new("phone_chars"));
    }

    Ok(())
}

pub fn validate_message_content(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() || value.len() > MAX_CONTENT_LEN {
        return Err(ValidationError::new("message_content_length"));
    }
    Ok(())
}

pub fn validate_channel_name(value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > 100 {
        return Err(ValidationError::new("channel_name_length"));
    }
    Ok(())
}

pub fn validate_media_url(value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > 1024 {
        return Err(ValidationError::new("media_url_length"));
    }
    if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
        return Err(ValidationError::new("media_url_scheme"));
    }
    Ok(())
}

pub fn validate_presence_status(value: &str) -> Result<(), ValidationError> {
    match value {
        "online" | "offline" => Ok(()),
        _ => Err(ValidationError::new("presence_status")),
    }
}

pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

pub fn normalize_phone(value: &str) -> String {
    value.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_validation_accepts_e164_shapes() {
        assert!(validate_phone("+15550001234").is_ok());
        assert!(validate_phone("15550001234").is_ok());
        assert!(validate_phone("+1-555-000").is_err());
        assert!(validate_phone("12345").is_err());
        assert!(validate_phone("+").is_err());
    }

    #[test]
    fn message_content_rejects_blank_and_oversized() {
        assert!(validate_message_content("hello").is_ok());
        assert!(validate_message_content("   ").is_err());
        assert!(validate_message_content(&"x".repeat(4001)).is_err());
    }

    #[test]
    fn presence_status_is_a_closed_set() {
        assert!(validate_presence_status("online").is_ok());
        assert!(validate_presence_status("offline").is_ok());
        assert!(validate_presence_status("away").is_err());
    }

    #[test]
    fn media_url_requires_http_scheme() {
        assert!(validate_media_url("https://cdn.example/img.png").is_ok());
        assert!(validate_media_url("ftp://cdn.example/img.png").is_err());
        assert!(validate_media_url("").is_err());
    }
}
