pub mod backup_service;
pub mod health_service;

pub use backup_service::BackupServiceImpl;
pub use health_service::HealthServiceImpl;
