use crate::errors::MdlError;
use crate::MirrorRule;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::Client;
use std::fmt::Formatter;
use std::sync::Arc;
use url::Url;

pub(crate) const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/108.0.0.0 Safari/537.36";
const LOGIN_PATH: &str = "login/index.php";

/// Cookies handed out by the portal at login. Read-only once the login is done.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    /// Cookie name/value pairs in the order the portal set them
    cookies: Vec<(String, String)>,
}

impl Session {
    /// Builds a session from known cookies, later duplicates replace earlier ones.
    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        let mut session = Session::default();
        for (name, value) in pairs {
            session.insert(name, value);
        }
        session
    }

    /// Adds a cookie, replacing the value of an existing cookie with the same
    /// name in place.
    pub(crate) fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.cookies.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.cookies.push((name, value)),
        }
    }

    pub fn cookies(&self) -> &[(String, String)] {
        &self.cookies
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// Value for the `Cookie` request header: `name=value; ` for every cookie.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}; "))
            .collect()
    }

    fn absorb_header(&mut self, header: &str) {
        for pair in header.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                if !name.is_empty() {
                    self.insert(name, value);
                }
            }
        }
    }
}

pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Result of a successful login: the session plus the page the portal
/// answered with, which lists the user's courses.
#[derive(Debug)]
pub struct Authenticated {
    pub session: Session,
    pub landing_url: Url,
    pub landing_page: String,
}

#[tracing::instrument(skip(credentials), fields(username = %credentials.username))]
pub async fn authenticate(
    rule: &MirrorRule,
    credentials: &Credentials,
) -> Result<Authenticated, MdlError> {
    let login_url = match rule.portal_url.join(LOGIN_PATH) {
        Ok(u) => u,
        Err(e) => return Err(MdlError::InvalidUrl(format!("{} | {}", rule.portal_url, e))),
    };

    let jar = Arc::new(Jar::default());
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(rule.login_timeout)
        .cookie_provider(jar.clone())
        .build()
        .map_err(|e| MdlError::LoginConnectivity(e.to_string()))?;

    let response = match client
        .post(login_url.clone())
        .form(&[
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
        ])
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Error sending login form to {}\nError : {}", login_url, e);
            return Err(MdlError::LoginConnectivity(e.to_string()));
        }
    };

    if !response.status().is_success() {
        tracing::error!(
            "Error status code received : {} |{}|",
            response.status(),
            login_url
        );
        return Err(MdlError::LoginConnectivity(format!(
            "server returned an error response. {} => {}",
            login_url,
            response.status()
        )));
    }

    let landing_url = response.url().clone();
    let landing_page = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            tracing::error!("Error reading login response\nError : {}", e);
            return Err(MdlError::LoginConnectivity(e.to_string()));
        }
    };

    if !landing_page.contains(&rule.logged_in_marker) {
        tracing::warn!(
            "Marker {:?} not found on {}, login rejected",
            rule.logged_in_marker,
            landing_url
        );
        return Err(MdlError::Authentication);
    }

    let mut session = Session::default();
    for url in [&rule.portal_url, &login_url, &landing_url] {
        if let Some(header) = jar.cookies(url) {
            if let Ok(header) = header.to_str() {
                session.absorb_header(header);
            }
        }
    }
    if session.is_empty() {
        tracing::warn!("Login accepted but the portal set no cookies");
    }
    tracing::debug!("Logged in with {} session cookie(s)", session.len());

    Ok(Authenticated {
        session,
        landing_url,
        landing_page,
    })
}

/// Client used for every request after login. Cookies are sent explicitly
/// from the [`Session`], so this client keeps no cookie store of its own.
pub(crate) fn session_client(rule: &MirrorRule) -> Result<Client, MdlError> {
    let mut builder = Client::builder().user_agent(USER_AGENT);
    if let Some(timeout) = rule.request_timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| MdlError::UnknownError(e.to_string()))
}
