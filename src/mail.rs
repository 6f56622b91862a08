//! Outbound mail sink.
//!
//! Delivery happens out of process: messages are spooled as JSON files in
//! the workspace `mail_outbox/` directory for the configured relay to
//! drain. Callers treat failures as best-effort and must not fail the
//! enclosing operation on a mail error.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

const OUTBOX_DIR: &str = "mail_outbox";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid recipient address: {0}")]
    Recipient(String),
    #[error("mail outbox unavailable: {0}")]
    Outbox(#[from] std::io::Error),
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Credentials mail sent after a successful admission.
pub fn credentials_message(
    sender: &str,
    full_name: &str,
    email: &str,
    username: &str,
    password: &str,
    admission_number: &str,
) -> MailMessage {
    let body = format!(
        "Dear {},\n\n\
         Welcome to our institution! Your student account has been successfully created.\n\n\
         Here are your login credentials:\n\
         Username: {}\n\
         Password: {}\n\
         Admission Number: {}\n\n\
         Regards,\n\
         Administration\n",
        full_name, username, password, admission_number
    );
    MailMessage {
        from: sender.to_string(),
        to: email.to_string(),
        subject: "Welcome to Student OS - Your Login Credentials".to_string(),
        body,
    }
}

/// Spools one message; returns the spool file path on success.
pub fn deliver(workspace: &Path, msg: &MailMessage) -> Result<PathBuf, MailError> {
    if !msg.to.contains('@') {
        return Err(MailError::Recipient(msg.to.clone()));
    }

    let outbox = workspace.join(OUTBOX_DIR);
    std::fs::create_dir_all(&outbox)?;

    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let path = outbox.join(format!("{}_{}.json", stamp, Uuid::new_v4().simple()));
    std::fs::write(&path, serde_json::to_string_pretty(msg)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_address_without_at_sign() {
        let msg = credentials_message("admissions@campus.local", "A", "nope", "a1", "pw", "ADM0001");
        let err = deliver(Path::new("/tmp"), &msg).unwrap_err();
        assert!(matches!(err, MailError::Recipient(_)));
    }

    #[test]
    fn credentials_body_carries_login_details() {
        let msg = credentials_message(
            "admissions@campus.local",
            "Jane Roe",
            "jane@example.com",
            "janeroe1234",
            "s3cretpass",
            "ADM0042",
        );
        assert!(msg.body.contains("Username: janeroe1234"));
        assert!(msg.body.contains("Password: s3cretpass"));
        assert!(msg.body.contains("Admission Number: ADM0042"));
    }
}
