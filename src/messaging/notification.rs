// Notifications returned by control commands and reported to the user

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Severity of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
}

/// Which part of the engine produced the notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCategory {
    Midi,
}

/// Notification with timestamp and metadata
#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NotificationLevel,
    pub category: NotificationCategory,
    pub message: String,
    pub timestamp: u64, // Unix timestamp in milliseconds
}

impl Notification {
    pub fn new(level: NotificationLevel, category: NotificationCategory, message: String) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        Self {
            level,
            category,
            message,
            timestamp,
        }
    }

    pub fn info(category: NotificationCategory, message: String) -> Self {
        Self::new(NotificationLevel::Info, category, message)
    }

    pub fn warning(category: NotificationCategory, message: String) -> Self {
        Self::new(NotificationLevel::Warning, category, message)
    }

    pub fn is_warning(&self) -> bool {
        self.level == NotificationLevel::Warning
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            NotificationLevel::Info => "info",
            NotificationLevel::Warning => "warning",
        };
        write!(f, "[{}] {}", level, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_creation() {
        let notif = Notification::info(NotificationCategory::Midi, "Test info".to_string());

        assert_eq!(notif.level, NotificationLevel::Info);
        assert_eq!(notif.category, NotificationCategory::Midi);
        assert_eq!(notif.message, "Test info");
        assert!(notif.timestamp > 0);
    }

    #[test]
    fn test_notification_helpers() {
        let info = Notification::info(NotificationCategory::Midi, "Info".to_string());
        let warning = Notification::warning(NotificationCategory::Midi, "Warning".to_string());

        assert!(!info.is_warning());
        assert!(warning.is_warning());
        assert_eq!(info.to_string(), "[info] Info");
    }

    #[test]
    fn test_notification_display() {
        let notif = Notification::warning(
            NotificationCategory::Midi,
            "unknown device access command".to_string(),
        );
        assert_eq!(notif.to_string(), "[warning] unknown device access command");
    }
}
