// Messaging - notifications surfaced by device and control commands

pub mod notification;

pub use notification::{Notification, NotificationCategory, NotificationLevel};
