use crate::classify::{classify_course_resources, ResourceKind, ResourceMap};
use crate::course::{list_courses, Course};
use crate::download::{course_dir_name, download_resource, write_external_links};
use crate::session::session_client;
use chrono::{DateTime, Utc};
use reqwest::{header, Client};
use scraper::Html;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tokio::sync::mpsc::Sender;
use url::Url;

pub mod classify;
pub mod course;
pub mod download;
mod errors;
pub mod link;
pub mod session;

pub use errors::MdlError;
pub use session::{authenticate, Credentials, Session};

pub const DEFAULT_PORTAL_URL: &str = "https://moodle.htw-berlin.de/";
pub const DEFAULT_LOGGED_IN_MARKER: &str = "Meine Kurse";
pub const DEFAULT_FILE_PAGE_MARKER: &str = "Klicken Sie auf den Link '";
const DEFAULT_LOGIN_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_PROGRESS_UPDATE_INTERVAL: u64 = 1000;

#[derive(Debug, Clone)]
pub struct MirrorRule {
    pub portal_url: Url,
    /// Root of the mirror, one sub directory per course goes in here
    pub output_directory: PathBuf,
    pub login_timeout: Duration,
    /// Timeout for every request after login. None waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// Text only shown to a logged in user
    pub logged_in_marker: String,
    /// Text marking an activity page that offers a single file
    pub file_page_marker: String,
    /// Record an unreachable course page as a failure instead of aborting.
    pub skip_unreachable_courses: bool,
    /// Progress update interval in millisecond
    pub progress_update_interval: u64,
}

impl MirrorRule {
    pub fn new(mut portal_url: Url, output_directory: impl Into<PathBuf>) -> Self {
        // login/index.php is joined onto this, keep the last path segment
        if !portal_url.path().ends_with('/') {
            let path = format!("{}/", portal_url.path());
            portal_url.set_path(&path);
        }
        Self {
            portal_url,
            output_directory: output_directory.into(),
            login_timeout: Duration::from_secs(DEFAULT_LOGIN_TIMEOUT_SECONDS),
            request_timeout: None,
            logged_in_marker: DEFAULT_LOGGED_IN_MARKER.to_string(),
            file_page_marker: DEFAULT_FILE_PAGE_MARKER.to_string(),
            skip_unreachable_courses: false,
            progress_update_interval: DEFAULT_PROGRESS_UPDATE_INTERVAL,
        }
    }
}

#[derive(Debug)]
pub enum Update {
    CourseUpdate(CourseProgress),
    MessageUpdate(Message),
    ProgressUpdate(Progress),
}

#[derive(Debug)]
pub struct CourseProgress {
    /// 1-based position of the course in the run
    pub index: usize,
    pub total: usize,
    pub course_name: String,
}

#[derive(Debug)]
pub struct Message {
    pub content: String,
    pub resource_name: String,
    pub is_error: bool,
}

#[derive(Debug)]
pub struct Progress {
    pub bytes_written: u64,
    pub file_size: u64,
    pub resource_name: String,
}

/// A resource or page that could not be retrieved and has to be fetched by hand.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    pub source_location: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct MirrorReport {
    pub courses: usize,
    pub downloaded: usize,
    pub failures: Vec<FailureRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// State shared by every step of a run: the logged in session and the
/// failures collected so far.
pub struct RunContext {
    client: Client,
    pub session: Session,
    pub rule: MirrorRule,
    pub failures: Vec<FailureRecord>,
    update_tx: Sender<Update>,
}

impl RunContext {
    pub fn new(
        rule: MirrorRule,
        session: Session,
        update_tx: Sender<Update>,
    ) -> Result<Self, MdlError> {
        Ok(Self {
            client: session_client(&rule)?,
            session,
            rule,
            failures: Vec::new(),
            update_tx,
        })
    }

    /// GETs a page with the session cookies. Error statuses count as failures.
    pub async fn fetch_page(&self, url: &Url) -> Result<String, String> {
        let mut request = self.client.get(url.clone());
        if !self.session.is_empty() {
            request = request.header(header::COOKIE, self.session.cookie_header());
        }
        let response = request.send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!(
                "server returned an error response. {} => {}",
                url,
                response.status()
            ));
        }
        response.text().await.map_err(|e| e.to_string())
    }

    pub fn record_failure(&mut self, source_location: &str, reason: String) {
        self.failures.push(FailureRecord {
            source_location: source_location.to_string(),
            reason,
        });
    }

    /// Sends an update. A closed receiver is ignored.
    pub(crate) async fn notify(&self, update: Update) {
        if self.update_tx.send(update).await.is_err() {
            tracing::trace!("Update receiver closed");
        }
    }

    pub(crate) fn try_notify(&self, update: Update) {
        if self.update_tx.try_send(update).is_err() {
            tracing::trace!("Update dropped");
        }
    }
}

/// Logs in, walks every course on the landing page and mirrors its
/// resources below `rule.output_directory`.
#[tracing::instrument(skip(credentials, update_tx))]
pub async fn init_mirror(
    rule: MirrorRule,
    credentials: Credentials,
    update_tx: Sender<Update>,
) -> Result<MirrorReport, MdlError> {
    let started_at = Utc::now();
    let authenticated = authenticate(&rule, &credentials).await?;

    if let Err(e) = fs::create_dir_all(&rule.output_directory).await {
        tracing::error!("Failed to create destination directory\nError : {}", e);
        return Err(MdlError::DestinationDirectory(format!(
            "{} | {} : {}",
            e,
            e.kind(),
            rule.output_directory.display()
        )));
    }

    let courses = {
        let landing_page = Html::parse_document(&authenticated.landing_page);
        list_courses(&landing_page, &authenticated.landing_url)
    };
    tracing::info!("{} course(s) found", courses.len());

    let mut ctx = RunContext::new(rule, authenticated.session, update_tx)?;
    let mut downloaded = 0;

    for (idx, course) in courses.iter().enumerate() {
        ctx.notify(Update::CourseUpdate(CourseProgress {
            index: idx + 1,
            total: courses.len(),
            course_name: course.display_name.clone(),
        }))
        .await;

        let resources = match classify_course_resources(&mut ctx, &course.source_url).await {
            Ok(resources) => resources,
            Err(e @ MdlError::CourseConnectivity { .. }) if ctx.rule.skip_unreachable_courses => {
                tracing::warn!("Skipping course {}. {}", course.display_name, e);
                ctx.notify(Update::MessageUpdate(Message {
                    content: "Course page could not be loaded, skipping".into(),
                    resource_name: course.display_name.clone(),
                    is_error: true,
                }))
                .await;
                ctx.record_failure(course.source_url.as_str(), e.to_string());
                continue;
            }
            Err(e) => return Err(e),
        };

        if resources.is_empty() {
            ctx.notify(Update::MessageUpdate(Message {
                content: "This course is empty".into(),
                resource_name: course.display_name.clone(),
                is_error: false,
            }))
            .await;
            continue;
        }

        downloaded += mirror_course(&mut ctx, course, &resources).await;
    }

    Ok(MirrorReport {
        courses: courses.len(),
        downloaded,
        failures: ctx.failures,
        started_at,
        finished_at: Utc::now(),
    })
}

/// Downloads a course's resources into its own directory. Failed downloads
/// are recorded and skipped. Returns the number of files written.
async fn mirror_course(ctx: &mut RunContext, course: &Course, resources: &ResourceMap) -> usize {
    let course_dir = ctx
        .rule
        .output_directory
        .join(course_dir_name(&course.display_name));
    if let Err(e) = fs::create_dir(&course_dir).await {
        if e.kind() != std::io::ErrorKind::AlreadyExists {
            tracing::error!(
                "Error creating course directory {}\nError : {} | {}",
                course_dir.display(),
                e,
                e.kind()
            );
        }
    }

    let mut downloaded = 0;
    for resource in resources
        .iter()
        .filter(|r| r.kind != ResourceKind::ExternalLink)
    {
        ctx.notify(Update::MessageUpdate(Message {
            content: "Downloading".into(),
            resource_name: resource.display_name.clone(),
            is_error: false,
        }))
        .await;
        match download_resource(ctx, &course_dir, resource).await {
            Ok(Some(_)) => downloaded += 1,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("An error occurred, continuing with the next file\nError : {}", e);
                ctx.notify(Update::MessageUpdate(Message {
                    content: "Error downloading resource, skipping".into(),
                    resource_name: resource.source_location.to_string(),
                    is_error: true,
                }))
                .await;
                ctx.record_failure(resource.source_location.as_str(), e.to_string());
            }
        }
    }

    if let Err(e) = write_external_links(ctx, &course_dir, resources).await {
        tracing::error!("Error writing external links\nError : {}", e);
        ctx.notify(Update::MessageUpdate(Message {
            content: "External links could not be saved".into(),
            resource_name: course.display_name.clone(),
            is_error: true,
        }))
        .await;
    }

    downloaded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_defaults() {
        let rule = MirrorRule::new(Url::parse(DEFAULT_PORTAL_URL).unwrap(), "downloads");
        assert_eq!(rule.login_timeout, Duration::from_secs(10));
        assert!(rule.request_timeout.is_none());
        assert!(!rule.skip_unreachable_courses);
        assert_eq!(rule.logged_in_marker, "Meine Kurse");
    }

    #[test]
    fn portal_url_gets_trailing_slash() {
        let rule = MirrorRule::new(Url::parse("https://lms.example/moodle").unwrap(), "out");
        assert_eq!(
            rule.portal_url.join("login/index.php").unwrap().as_str(),
            "https://lms.example/moodle/login/index.php"
        );
    }
}
