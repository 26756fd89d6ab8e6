use std::collections::HashMap;

use crate::http::{HttpRequest, HttpResponse};
use crate::prelude::HTTP_OK;
use crate::utils::set_cookie::SetCookie;

pub const SESSION_COOKIE: &str = "SESSIONID";

#[derive(Debug, Default)]
pub struct Session {
    pub data: HashMap<String, String>,
}

/// Process-wide session map. All handlers run on the reactor thread, so a
/// plain map suffices; a worker pool would need to make this concurrent.
/// Sessions are never evicted.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<String, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore {
            sessions: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Demo endpoint: a returning session increments its view counter, an
    /// unknown or absent cookie starts a fresh session.
    pub fn handle(&mut self, request: &HttpRequest, response: &mut HttpResponse) {
        let known = request
            .cookies
            .get(SESSION_COOKIE)
            .filter(|id| self.sessions.contains_key(*id))
            .cloned();

        let views = match known {
            Some(id) => {
                let session = self.sessions.entry(id).or_default();
                bump_views(session)
            }
            None => {
                let id = new_session_id();
                let mut session = Session::default();
                let views = bump_views(&mut session);
                self.sessions.insert(id.clone(), session);
                response.set_header(
                    "Set-Cookie",
                    &SetCookie::new(SESSION_COOKIE, &id).to_header(),
                );
                views
            }
        };

        response.set_status_code(HTTP_OK);
        response.set_body(format!("views: {}\n", views).into_bytes(), "text/plain");
    }
}

fn bump_views(session: &mut Session) -> u64 {
    let views = session
        .data
        .get("views")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    session.data.insert("views".to_string(), views.to_string());
    views
}

fn new_session_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}
