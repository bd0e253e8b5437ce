//! User endpoints.

use hd_core::error::HdResult;
use hd_models::User;

use crate::client::ApiClient;

impl ApiClient {
    /// Get the profile of the authenticated user.
    pub async fn current_user(&self) -> HdResult<User> {
        self.get_json::<User>("/users/me").await?.into_data()
    }
}
