//! User administration.

use std::sync::Arc;

use crate::connection::stub::ServerStub;
use crate::error::{DriverError, DriverResult};
use crate::protocol::{ControlBody, ControlResponse};

/// Handle to one user account on the server.
#[derive(Clone)]
pub struct User {
    username: String,
    stub: Arc<ServerStub>,
}

impl User {
    pub fn username(&self) -> &str {
        &self.username
    }

    pub async fn update_password(&self, new_password: &str) -> DriverResult<()> {
        self.stub
            .call(ControlBody::UserUpdate {
                username: self.username.clone(),
                new_username: self.username.clone(),
                new_password: new_password.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn delete(self) -> DriverResult<()> {
        self.stub
            .call(ControlBody::UserDelete {
                username: self.username,
            })
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username)
            .finish()
    }
}

/// User administration on one connection.
pub struct UserManager {
    stub: Arc<ServerStub>,
}

impl UserManager {
    pub(crate) fn new(stub: Arc<ServerStub>) -> Self {
        Self { stub }
    }

    pub async fn all(&self) -> DriverResult<Vec<User>> {
        let response = self.stub.call(ControlBody::UsersAll).await?;
        let data = match response {
            ControlResponse::Ok { data: Some(data) } => data,
            other => {
                return Err(DriverError::Protocol(format!(
                    "unexpected response: {:?}",
                    other
                )))
            }
        };
        let usernames = data
            .get("users")
            .and_then(|u| u.as_array())
            .ok_or_else(|| DriverError::Protocol("malformed user list".to_string()))?;
        Ok(usernames
            .iter()
            .filter_map(|u| u.as_str())
            .map(|username| User {
                username: username.to_string(),
                stub: Arc::clone(&self.stub),
            })
            .collect())
    }

    pub async fn contains(&self, username: &str) -> DriverResult<bool> {
        let response = self
            .stub
            .call(ControlBody::UsersContains {
                username: username.to_string(),
            })
            .await?;
        match response {
            ControlResponse::Ok { data: Some(data) } => data
                .get("contains")
                .and_then(|c| c.as_bool())
                .ok_or_else(|| DriverError::Protocol("malformed contains response".to_string())),
            other => Err(DriverError::Protocol(format!(
                "unexpected response: {:?}",
                other
            ))),
        }
    }

    pub async fn create(&self, username: &str, password: &str) -> DriverResult<User> {
        self.stub
            .call(ControlBody::UsersCreate {
                username: username.to_string(),
                password: password.to_string(),
            })
            .await?;
        Ok(User {
            username: username.to_string(),
            stub: Arc::clone(&self.stub),
        })
    }

    pub async fn get(&self, username: &str) -> DriverResult<User> {
        if !self.contains(username).await? {
            return Err(DriverError::Server(crate::error::ServerError::new(
                "USER_NOT_FOUND",
                format!("user not found: {}", username),
            )));
        }
        Ok(User {
            username: username.to_string(),
            stub: Arc::clone(&self.stub),
        })
    }
}
