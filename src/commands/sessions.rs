use super::PosCommands;
use crate::models::Session;
use crate::sessions::{self, CloseSession, OpenSession};

impl PosCommands {
    pub fn open_session(&self, input: &OpenSession) -> Result<Session, String> {
        let mut input = input.clone();
        if input.store_id.trim().is_empty() {
            input.store_id = self.engine.context().store_id().to_string();
        }
        self.with_conn(|conn| sessions::open_session(conn, &input))
    }

    pub fn close_session(&self, input: &CloseSession) -> Result<Session, String> {
        self.with_conn(|conn| sessions::close_session(conn, input))
    }

    pub fn get_open_session(&self) -> Result<Option<Session>, String> {
        let store_id = self.engine.context().store_id().to_string();
        self.with_conn(|conn| sessions::get_open_session(conn, &store_id))
    }
}
