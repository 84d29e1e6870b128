//! REST paths of the ServiceHub API, relative to the API base URL.
//!
//! Pass them to [`SessionClient`](servicehub_auth::SessionClient) helpers such
//! as `get_json`.

use std::fmt::Display;

pub const LOGIN: &str = "auth/login/";
pub const LOGOUT: &str = "auth/logout/";
pub const REFRESH: &str = "auth/refresh/";
pub const ME: &str = "auth/me/";
pub const REGISTER: &str = "auth/register/";

pub const CLIENTS: &str = "clients/";
pub const QUOTES: &str = "quotes/";
pub const SERVICES: &str = "services/";

pub const ANALYTICS_DASHBOARD: &str = "analytics/dashboard/";
pub const ANALYTICS_CLIENTS: &str = "analytics/clients/";
pub const ANALYTICS_QUOTES: &str = "analytics/quotes/";

/// 顧客詳細
pub fn client_detail(id: impl Display) -> String {
    format!("clients/{}/", id)
}

pub fn client_contacts(id: impl Display) -> String {
    format!("clients/{}/contacts/", id)
}

pub fn client_history(id: impl Display) -> String {
    format!("clients/{}/history/", id)
}

/// 見積詳細
pub fn quote_detail(id: impl Display) -> String {
    format!("quotes/{}/", id)
}

pub fn quote_send(id: impl Display) -> String {
    format!("quotes/{}/send/", id)
}

pub fn quote_approve(id: impl Display) -> String {
    format!("quotes/{}/approve/", id)
}

pub fn quote_reject(id: impl Display) -> String {
    format!("quotes/{}/reject/", id)
}

pub fn quote_history(id: impl Display) -> String {
    format!("quotes/{}/history/", id)
}

pub fn service_detail(id: impl Display) -> String {
    format!("services/{}/", id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_paths() {
        assert_eq!(client_detail(7), "clients/7/");
        assert_eq!(client_contacts(7), "clients/7/contacts/");
        assert_eq!(quote_approve("q-12"), "quotes/q-12/approve/");
        assert_eq!(service_detail(3), "services/3/");
    }
}
