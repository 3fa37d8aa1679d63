//! Cache key construction.
//!
//! Every cache is addressed by flat string keys of the form
//! `prefix_param1_param2`. Nothing prevents two different inputs from
//! producing the same key, so callers should always go through these helpers.

use std::fmt::Display;

/// Join a prefix and its parameters with `_`.
pub fn namespace_key<P: Display>(prefix: &str, params: &[P]) -> String {
  let mut key = prefix.to_string();
  for param in params {
    key.push('_');
    key.push_str(&param.to_string());
  }
  key
}

/// Collections the courier apps page through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CollectionKey {
  /// Orders placed by a customer
  Orders { user_id: String },
  /// Orders assigned to a rider, optionally narrowed to one status
  RiderTasks {
    rider_id: String,
    status: Option<String>,
  },
  /// Saved addresses of a customer
  Addresses { user_id: String },
  /// Finance records for a rider within a period such as `2024-05`
  Finance { rider_id: String, period: String },
}

impl CollectionKey {
  /// The namespace string this collection is cached under.
  pub fn namespace(&self) -> String {
    match self {
      Self::Orders { user_id } => namespace_key("orders", &[user_id]),
      Self::RiderTasks { rider_id, status } => match status {
        Some(status) => namespace_key("rider_tasks", &[rider_id, status]),
        None => namespace_key("rider_tasks", &[rider_id]),
      },
      Self::Addresses { user_id } => namespace_key("addresses", &[user_id]),
      Self::Finance { rider_id, period } => namespace_key("finance", &[rider_id, period]),
    }
  }
}

impl Display for CollectionKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.namespace())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_namespace_key() {
    assert_eq!(namespace_key("orders", &["u1"]), "orders_u1");
    assert_eq!(namespace_key("finance", &["r7", "2024-05"]), "finance_r7_2024-05");
    assert_eq!(namespace_key::<&str>("settings", &[]), "settings");
    assert_eq!(namespace_key("page", &[3]), "page_3");
  }

  #[test]
  fn test_collection_namespace() {
    let orders = CollectionKey::Orders {
      user_id: "u1".to_string(),
    };
    assert_eq!(orders.to_string(), "orders_u1");

    let tasks = CollectionKey::RiderTasks {
      rider_id: "r1".to_string(),
      status: Some("delivering".to_string()),
    };
    assert_eq!(tasks.namespace(), "rider_tasks_r1_delivering");

    let all_tasks = CollectionKey::RiderTasks {
      rider_id: "r1".to_string(),
      status: None,
    };
    assert_eq!(all_tasks.namespace(), "rider_tasks_r1");
  }
}
