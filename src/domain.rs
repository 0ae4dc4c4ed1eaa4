//! Closed enumerations for the role, status and action vocabularies.
//!
//! The database and the wire format keep the Spanish identifiers the portal has
//! always used (`admin_sma`, `en_proceso`, `creacion`, ...); code works with the
//! typed forms and matches exhaustively at every authorization site.

use serde::{Deserialize, Serialize};

/// User role. Determines visibility scope and write permissions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "superadmin")]
    SuperAdmin,
    #[serde(rename = "admin_sma")]
    SmaAdmin,
    #[serde(rename = "organismo")]
    Organism,
    #[serde(rename = "ciudadano")]
    Citizen,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "superadmin",
            Role::SmaAdmin => "admin_sma",
            Role::Organism => "organismo",
            Role::Citizen => "ciudadano",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "superadmin" => Some(Role::SuperAdmin),
            "admin_sma" => Some(Role::SmaAdmin),
            "organismo" => Some(Role::Organism),
            "ciudadano" => Some(Role::Citizen),
            _ => None,
        }
    }

    /// Either administrative role: cross-organization visibility and write access.
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::SuperAdmin | Role::SmaAdmin)
    }
}

/// Lifecycle status of a measure.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasureStatus {
    #[serde(rename = "pendiente")]
    Pending,
    #[serde(rename = "en_proceso")]
    InProgress,
    #[serde(rename = "completada")]
    Completed,
    #[serde(rename = "retrasada")]
    Delayed,
    #[serde(rename = "suspendida")]
    Suspended,
}

impl MeasureStatus {
    pub const ALL: [MeasureStatus; 5] = [
        MeasureStatus::Pending,
        MeasureStatus::InProgress,
        MeasureStatus::Completed,
        MeasureStatus::Delayed,
        MeasureStatus::Suspended,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MeasureStatus::Pending => "pendiente",
            MeasureStatus::InProgress => "en_proceso",
            MeasureStatus::Completed => "completada",
            MeasureStatus::Delayed => "retrasada",
            MeasureStatus::Suspended => "suspendida",
        }
    }

    pub fn parse(s: &str) -> Option<MeasureStatus> {
        match s {
            "pendiente" => Some(MeasureStatus::Pending),
            "en_proceso" => Some(MeasureStatus::InProgress),
            "completada" => Some(MeasureStatus::Completed),
            "retrasada" => Some(MeasureStatus::Delayed),
            "suspendida" => Some(MeasureStatus::Suspended),
            _ => None,
        }
    }

    /// Terminal statuses are excluded from the overdue filter and the deadline sweep.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MeasureStatus::Completed | MeasureStatus::Suspended)
    }

    /// Display label used in CSV and PDF output.
    pub fn label(&self) -> &'static str {
        match self {
            MeasureStatus::Pending => "Pendiente",
            MeasureStatus::InProgress => "En Proceso",
            MeasureStatus::Completed => "Completada",
            MeasureStatus::Delayed => "Retrasada",
            MeasureStatus::Suspended => "Suspendida",
        }
    }
}

/// Measure priority.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    #[serde(rename = "alta")]
    High,
    #[serde(rename = "media")]
    Medium,
    #[serde(rename = "baja")]
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "alta",
            Priority::Medium => "media",
            Priority::Low => "baja",
        }
    }

    pub fn parse(s: &str) -> Option<Priority> {
        match s {
            "alta" => Some(Priority::High),
            "media" => Some(Priority::Medium),
            "baja" => Some(Priority::Low),
            _ => None,
        }
    }
}

/// Kind of audited action.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "creacion")]
    Create,
    #[serde(rename = "modificacion")]
    Update,
    #[serde(rename = "eliminacion")]
    Delete,
    #[serde(rename = "login")]
    Login,
    #[serde(rename = "logout")]
    Logout,
    #[serde(rename = "exportacion")]
    Export,
    #[serde(rename = "descarga")]
    Download,
    #[serde(rename = "api_call")]
    ApiCall,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "creacion",
            AuditAction::Update => "modificacion",
            AuditAction::Delete => "eliminacion",
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
            AuditAction::Export => "exportacion",
            AuditAction::Download => "descarga",
            AuditAction::ApiCall => "api_call",
        }
    }

    /// Human-readable Spanish label used in audit descriptions.
    pub fn label(&self) -> &'static str {
        match self {
            AuditAction::Create => "Creación",
            AuditAction::Update => "Modificación",
            AuditAction::Delete => "Eliminación",
            AuditAction::Login => "Inicio de sesión",
            AuditAction::Logout => "Cierre de sesión",
            AuditAction::Export => "Exportación de datos",
            AuditAction::Download => "Descarga de archivo",
            AuditAction::ApiCall => "Llamada a la API",
        }
    }
}

/// Generation state of a requested report.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    #[serde(rename = "pendiente")]
    Pending,
    #[serde(rename = "generando")]
    Generating,
    #[serde(rename = "completado")]
    Completed,
    #[serde(rename = "error")]
    Failed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pendiente",
            ReportStatus::Generating => "generando",
            ReportStatus::Completed => "completado",
            ReportStatus::Failed => "error",
        }
    }

    pub fn parse(s: &str) -> Option<ReportStatus> {
        match s {
            "pendiente" => Some(ReportStatus::Pending),
            "generando" => Some(ReportStatus::Generating),
            "completado" => Some(ReportStatus::Completed),
            "error" => Some(ReportStatus::Failed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [Role::SuperAdmin, Role::SmaAdmin, Role::Organism, Role::Citizen] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("staff"), None);
    }

    #[test]
    fn test_admin_roles() {
        assert!(Role::SuperAdmin.is_admin());
        assert!(Role::SmaAdmin.is_admin());
        assert!(!Role::Organism.is_admin());
        assert!(!Role::Citizen.is_admin());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(MeasureStatus::Completed.is_terminal());
        assert!(MeasureStatus::Suspended.is_terminal());
        assert!(!MeasureStatus::InProgress.is_terminal());
        assert!(!MeasureStatus::Delayed.is_terminal());
    }
}
