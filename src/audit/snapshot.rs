//! Field snapshots for update diffing.
//!
//! A snapshot lists the audit-relevant fields of an entity as stringified
//! values. Identity and bookkeeping fields (primary key, created_at,
//! updated_at) are deliberately absent so they never produce change details.

use crate::db::entities::{measure, organization, progress_record, user};

pub trait AuditSnapshot {
    fn snapshot(&self) -> Vec<(&'static str, Option<String>)>;
}

fn some(value: impl ToString) -> Option<String> {
    Some(value.to_string())
}

impl AuditSnapshot for measure::Model {
    fn snapshot(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("code", some(&self.code)),
            ("name", some(&self.name)),
            ("description", some(&self.description)),
            ("component_id", some(self.component_id)),
            ("start_date", some(self.start_date)),
            ("end_date", some(self.end_date)),
            ("status", some(&self.status)),
            ("priority", some(&self.priority)),
            ("progress_percent", some(self.progress_percent)),
            ("is_active", some(self.is_active)),
        ]
    }
}

impl AuditSnapshot for organization::Model {
    fn snapshot(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("name", some(&self.name)),
            ("type_id", some(self.type_id)),
            ("tax_id", some(&self.tax_id)),
            ("address", some(&self.address)),
            ("commune", some(&self.commune)),
            ("region", some(&self.region)),
            ("phone", some(&self.phone)),
            ("contact_email", some(&self.contact_email)),
            ("website", some(&self.website)),
            ("is_active", some(self.is_active)),
        ]
    }
}

impl AuditSnapshot for user::Model {
    fn snapshot(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("username", some(&self.username)),
            ("full_name", some(&self.full_name)),
            ("email", some(&self.email)),
            ("position", some(&self.position)),
            ("phone", some(&self.phone)),
            ("role", some(&self.role)),
            ("organization_id", self.organization_id.map(|id| id.to_string())),
            ("is_active", some(self.is_active)),
        ]
    }
}

impl AuditSnapshot for progress_record::Model {
    fn snapshot(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("measure_id", some(self.measure_id)),
            ("organization_id", some(self.organization_id)),
            ("record_date", some(self.record_date)),
            ("progress_percent", some(self.progress_percent)),
            ("description", some(&self.description)),
            ("evidence_path", self.evidence_path.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measure_snapshot_omits_bookkeeping_fields() {
        let m = measure::Model {
            id: 1,
            code: "MED-001".into(),
            name: "Red de monitoreo".into(),
            description: String::new(),
            component_id: 1,
            start_date: chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            end_date: chrono::NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
            status: "pendiente".into(),
            priority: "alta".into(),
            progress_percent: 0.0,
            is_active: true,
            created_at: 0,
            updated_at: 0,
        };
        let snapshot = m.snapshot();
        assert!(snapshot.iter().all(|(f, _)| !matches!(*f, "id" | "created_at" | "updated_at")));
        assert!(snapshot.iter().any(|(f, _)| *f == "status"));
    }
}
