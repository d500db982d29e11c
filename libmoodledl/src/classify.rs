//! Turns the activities of a course page into typed resources.
//!
//! Every activity page is matched against an ordered table of rules. The
//! first rule that matches decides the kind of resource and how its links
//! are read off the page; pages no rule matches yield nothing.

use crate::errors::MdlError;
use crate::link::{anchors_within, collapse_whitespace, strip_force_download};
use crate::{Message, RunContext, Update};
use lazy_static::lazy_static;
use scraper::{Html, Selector};
use url::Url;

/// Prefix of every external link's name in a [`ResourceMap`].
pub const EXTERNAL_LINK_PREFIX: &str = "extURL:";

const FOLDER_PATH_MARKER: &str = "/folder/";
const URL_PATH_MARKER: &str = "/url/";
const PAGE_PATH_MARKER: &str = "/page/";

lazy_static! {
    static ref ACTIVITY_INSTANCE: Selector =
        Selector::parse("div.activityinstance").expect("static selector");
    static ref RESOURCE_WORKAROUND: Selector =
        Selector::parse("div.resourceworkaround").expect("static selector");
    static ref FOLDER_FILE: Selector =
        Selector::parse("span.fp-filename-icon").expect("static selector");
    static ref URL_WORKAROUND: Selector =
        Selector::parse("div.urlworkaround").expect("static selector");
    static ref TITLE: Selector = Selector::parse("title").expect("static selector");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    PlainFile,
    FolderEntry,
    ExternalLink,
    RenderedPage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub display_name: String,
    pub source_location: Url,
    pub kind: ResourceKind,
}

/// Resources of one course keyed by display name, in discovery order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceMap {
    entries: Vec<Resource>,
}

impl ResourceMap {
    /// Inserts a resource. A resource with the same display name is replaced
    /// where it stands and returned.
    pub fn insert(&mut self, resource: Resource) -> Option<Resource> {
        match self
            .entries
            .iter_mut()
            .find(|r| r.display_name == resource.display_name)
        {
            Some(existing) => Some(std::mem::replace(existing, resource)),
            None => {
                self.entries.push(resource);
                None
            }
        }
    }

    pub fn get(&self, display_name: &str) -> Option<&Resource> {
        self.entries.iter().find(|r| r.display_name == display_name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Resource> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a ResourceMap {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    /// The raw page contains this text
    BodyContains(String),
    /// The activity URL's path contains this text
    PathContains(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationRule {
    pub matcher: Matcher,
    pub kind: ResourceKind,
}

impl ClassificationRule {
    pub fn matches(&self, page_url: &Url, body: &str) -> bool {
        match &self.matcher {
            Matcher::BodyContains(text) => body.contains(text.as_str()),
            Matcher::PathContains(marker) => page_url.path().contains(marker),
        }
    }

    /// Reads this rule's resources off an activity page.
    pub fn extract(&self, page_url: &Url, document: &Html) -> Vec<Resource> {
        match self.kind {
            ResourceKind::PlainFile => anchors_within(document, &RESOURCE_WORKAROUND, page_url)
                .into_iter()
                .filter(|anchor| !anchor.text.is_empty())
                .map(|anchor| Resource {
                    display_name: anchor.text,
                    source_location: anchor.url,
                    kind: ResourceKind::PlainFile,
                })
                .collect(),
            ResourceKind::FolderEntry => anchors_within(document, &FOLDER_FILE, page_url)
                .into_iter()
                .filter(|anchor| !anchor.text.is_empty())
                .map(|anchor| Resource {
                    display_name: anchor.text,
                    source_location: strip_force_download(&anchor.url),
                    kind: ResourceKind::FolderEntry,
                })
                .collect(),
            ResourceKind::ExternalLink => anchors_within(document, &URL_WORKAROUND, page_url)
                .into_iter()
                .map(|anchor| Resource {
                    display_name: format!("{EXTERNAL_LINK_PREFIX}{}", anchor.text),
                    source_location: anchor.url,
                    kind: ResourceKind::ExternalLink,
                })
                .collect(),
            ResourceKind::RenderedPage => vec![Resource {
                display_name: rendered_page_name(document),
                source_location: page_url.clone(),
                kind: ResourceKind::RenderedPage,
            }],
        }
    }
}

/// Rules in priority order: single file page, folder, external link, page.
pub fn default_rules(file_page_marker: &str) -> Vec<ClassificationRule> {
    vec![
        ClassificationRule {
            matcher: Matcher::BodyContains(file_page_marker.to_string()),
            kind: ResourceKind::PlainFile,
        },
        ClassificationRule {
            matcher: Matcher::PathContains(FOLDER_PATH_MARKER),
            kind: ResourceKind::FolderEntry,
        },
        ClassificationRule {
            matcher: Matcher::PathContains(URL_PATH_MARKER),
            kind: ResourceKind::ExternalLink,
        },
        ClassificationRule {
            matcher: Matcher::PathContains(PAGE_PATH_MARKER),
            kind: ResourceKind::RenderedPage,
        },
    ]
}

/// Classifies one fetched activity page with the first matching rule.
pub fn classify_page(rules: &[ClassificationRule], page_url: &Url, body: &str) -> Vec<Resource> {
    match rules.iter().find(|rule| rule.matches(page_url, body)) {
        Some(rule) => {
            let document = Html::parse_document(body);
            rule.extract(page_url, &document)
        }
        None => {
            tracing::debug!("No rule matches {}, skipping", page_url);
            Vec::new()
        }
    }
}

/// File name for a static page: its title with spaces turned into hyphens,
/// colons and periods removed, plus `.html`.
fn rendered_page_name(document: &Html) -> String {
    let title = document
        .select(&TITLE)
        .next()
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .unwrap_or_default();
    format!("{}.html", title.replace(' ', "-").replace([':', '.'], ""))
}

/// Activity page links on a course page, in document order.
pub fn activity_links(course_page: &str, course_url: &Url) -> Vec<Url> {
    let document = Html::parse_document(course_page);
    anchors_within(&document, &ACTIVITY_INSTANCE, course_url)
        .into_iter()
        .map(|anchor| anchor.url)
        .collect()
}

/// Fetches a course page and every activity linked from it, and classifies
/// the activities. An unreachable course page is an error; an unreachable
/// activity page is recorded as a failure and skipped.
#[tracing::instrument(skip(ctx))]
pub async fn classify_course_resources(
    ctx: &mut RunContext,
    course_url: &Url,
) -> Result<ResourceMap, MdlError> {
    let course_page = match ctx.fetch_page(course_url).await {
        Ok(body) => body,
        Err(message) => {
            tracing::error!("Error loading course page {}\nError : {}", course_url, message);
            return Err(MdlError::CourseConnectivity {
                url: course_url.to_string(),
                message,
            });
        }
    };

    let candidates = activity_links(&course_page, course_url);
    tracing::debug!("{} activities on {}", candidates.len(), course_url);

    let rules = default_rules(&ctx.rule.file_page_marker);
    let mut resources = ResourceMap::default();

    for page_url in candidates {
        let body = match ctx.fetch_page(&page_url).await {
            Ok(body) => body,
            Err(message) => {
                let err = MdlError::Fetch {
                    url: page_url.to_string(),
                    message,
                };
                tracing::warn!("{}", err);
                ctx.notify(Update::MessageUpdate(Message {
                    content: "Error loading activity, skipping".into(),
                    resource_name: page_url.to_string(),
                    is_error: true,
                }))
                .await;
                ctx.record_failure(page_url.as_str(), err.to_string());
                continue;
            }
        };

        for resource in classify_page(&rules, &page_url, &body) {
            let content = match resource.kind {
                ResourceKind::ExternalLink => "External link found",
                ResourceKind::RenderedPage => "Page found",
                _ => "File found",
            };
            ctx.notify(Update::MessageUpdate(Message {
                content: content.into(),
                resource_name: resource.display_name.clone(),
                is_error: false,
            }))
            .await;
            if let Some(replaced) = resources.insert(resource) {
                tracing::debug!(
                    "{} replaces an earlier resource of the same name ({})",
                    replaced.display_name,
                    replaced.source_location
                );
            }
        }
    }

    Ok(resources)
}
