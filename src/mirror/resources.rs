//! Upstream directory datasets mirrored locally.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// An item type served by the upstream directory.
pub trait MirrorResource: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Upstream path segment, also used in cache keys (e.g., "customers")
  fn resource() -> &'static str;

  /// Text fields matched by free-text search
  fn search_fields(&self) -> Vec<&str>;

  /// Case-insensitive substring match; `needle` must already be lowercase.
  fn matches(&self, needle: &str) -> bool {
    self
      .search_fields()
      .iter()
      .any(|field| field.to_lowercase().contains(needle))
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
  pub id: String,
  pub name: String,
  pub code: String,
  #[serde(default)]
  pub city: String,
}

impl MirrorResource for Customer {
  fn resource() -> &'static str {
    "customers"
  }

  fn search_fields(&self) -> Vec<&str> {
    vec![self.name.as_str(), self.code.as_str(), self.city.as_str()]
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
  pub id: String,
  pub sku: String,
  pub name: String,
  #[serde(default)]
  pub category: String,
}

impl MirrorResource for Item {
  fn resource() -> &'static str {
    "items"
  }

  fn search_fields(&self) -> Vec<&str> {
    vec![self.sku.as_str(), self.name.as_str(), self.category.as_str()]
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub email: String,
  #[serde(default)]
  pub department: String,
}

impl MirrorResource for Employee {
  fn resource() -> &'static str {
    "employees"
  }

  fn search_fields(&self) -> Vec<&str> {
    vec![self.name.as_str(), self.email.as_str(), self.department.as_str()]
  }
}

/// Resource selector for callers that pick a dataset at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
  Customers,
  Items,
  Employees,
}

impl ResourceKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResourceKind::Customers => Customer::resource(),
      ResourceKind::Items => Item::resource(),
      ResourceKind::Employees => Employee::resource(),
    }
  }
}

impl fmt::Display for ResourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ResourceKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "customers" | "customer" => Ok(ResourceKind::Customers),
      "items" | "item" => Ok(ResourceKind::Items),
      "employees" | "employee" => Ok(ResourceKind::Employees),
      other => Err(Error::NotFound(format!("resource {}", other))),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_customer_matches_any_search_field() {
    let customer = Customer {
      id: "1".to_string(),
      name: "Acme Foods".to_string(),
      code: "ACM-01".to_string(),
      city: "Porto".to_string(),
    };
    assert!(customer.matches("acme"));
    assert!(customer.matches("acm-0"));
    assert!(customer.matches("port"));
    assert!(!customer.matches("lisbon"));
  }

  #[test]
  fn test_resource_kind_parsing() {
    assert_eq!("Items".parse::<ResourceKind>().unwrap(), ResourceKind::Items);
    assert_eq!("employee".parse::<ResourceKind>().unwrap().as_str(), "employees");
    assert!("vendors".parse::<ResourceKind>().is_err());
  }
}
