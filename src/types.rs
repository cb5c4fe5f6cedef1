//! Request and response types for the Frappe document API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A generic Frappe document: an open field map.
///
/// Frappe doctypes are schemaless from the gateway's point of view; callers
/// interpret fields they know about.
pub type Document = serde_json::Map<String, Value>;

/// A page of documents.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DocumentList {
    pub data: Vec<Document>,
    #[serde(rename = "total_count")]
    pub total: usize,
    #[serde(rename = "page_length")]
    pub page_size: usize,
    #[serde(rename = "start")]
    pub page: usize,
    pub has_more: bool,
}

/// Parameters for listing documents of one doctype.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ListRequest {
    pub doctype: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub filters: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(default, rename = "page_length")]
    pub page_size: usize,
    #[serde(default, rename = "start")]
    pub page: usize,
}

impl ListRequest {
    pub fn new(doctype: impl Into<String>) -> Self {
        Self {
            doctype: doctype.into(),
            ..Default::default()
        }
    }

    pub fn with_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn with_page(mut self, page_size: usize, page: usize) -> Self {
        self.page_size = page_size;
        self.page = page;
        self
    }
}

/// Parameters for text search. With an empty `text` this degrades to a
/// filtered listing on the resource endpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    pub doctype: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub filters: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(default, rename = "page_length")]
    pub page_size: usize,
    #[serde(default, rename = "start")]
    pub page: usize,
}

impl SearchRequest {
    pub fn new(doctype: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            doctype: doctype.into(),
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Parameters for an aggregation query (`group_by` with SUM/COUNT fields).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AggregationRequest {
    pub doctype: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub filters: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(default)]
    pub limit: usize,
}

impl AggregationRequest {
    pub fn new(doctype: impl Into<String>) -> Self {
        Self {
            doctype: doctype.into(),
            ..Default::default()
        }
    }
}

/// Parameters for running a stored report.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReportRequest {
    pub report_name: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub filters: serde_json::Map<String, Value>,
    /// Run the report as this user, when the upstream honors it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl ReportRequest {
    pub fn new(report_name: impl Into<String>) -> Self {
        Self {
            report_name: report_name.into(),
            ..Default::default()
        }
    }
}

/// One column of a report result.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReportColumn {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub fieldname: String,
    #[serde(default)]
    pub fieldtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
}

/// A report result: columns plus row-major data.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReportResponse {
    pub columns: Vec<ReportColumn>,
    pub data: Vec<Vec<Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_request_builder() {
        let req = ListRequest::new("Task")
            .with_fields(["name", "subject", "status"])
            .with_filter("status", "Open")
            .with_order_by("modified desc")
            .with_page(20, 0);

        assert_eq!(req.doctype, "Task");
        assert_eq!(req.fields.len(), 3);
        assert_eq!(req.filters.get("status"), Some(&Value::from("Open")));
        assert_eq!(req.page_size, 20);
    }

    #[test]
    fn test_report_column_tolerates_partial_payload() {
        let col: ReportColumn =
            serde_json::from_value(serde_json::json!({"label": "Amount", "fieldtype": "Currency"}))
                .unwrap();
        assert_eq!(col.label, "Amount");
        assert_eq!(col.fieldname, "");
        assert!(col.width.is_none());
    }
}
