use super::PosCommands;
use crate::customers;
use crate::models::{Customer, NewCustomer};

impl PosCommands {
    pub fn search_customers(&self, query: &str) -> Result<Vec<Customer>, String> {
        self.with_conn(|conn| customers::search_customers(conn, query))
    }

    pub fn create_customer(&self, data: &NewCustomer) -> Result<Customer, String> {
        self.with_conn(|conn| customers::create_customer(conn, data))
    }
}

#[cfg(test)]
mod tests {
    use crate::commands::test_support::seeded_commands;
    use crate::models::NewCustomer;

    #[tokio::test]
    async fn local_customer_survives_next_pull() {
        let (commands, _remote) = seeded_commands().await;
        let payload: NewCustomer =
            serde_json::from_value(serde_json::json!({"fullName": "Sara", "phone": "0655"}))
                .expect("payload");
        let created = commands.create_customer(&payload).expect("create");

        assert!(commands.sync_full_pull().await.success);
        let found = commands.search_customers("sara").expect("search");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, created.id);
        assert_eq!(commands.search_customers("0600").expect("search").len(), 1);

        let err = commands
            .create_customer(&NewCustomer {
                full_name: "".into(),
                phone: "1".into(),
                address: None,
            })
            .expect_err("name required");
        assert!(err.contains("name"));
    }
}
