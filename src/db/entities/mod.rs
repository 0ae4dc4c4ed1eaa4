//! Database entities

pub mod assignment;
pub mod audit_config;
pub mod audit_entry;
pub mod change_detail;
pub mod component;
pub mod contact;
pub mod measure;
pub mod notification;
pub mod notification_config;
pub mod notification_type;
pub mod organization;
pub mod organization_type;
pub mod progress_record;
pub mod report;
pub mod report_type;
pub mod user;
