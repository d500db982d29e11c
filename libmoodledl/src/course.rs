use crate::link::anchors_within;
use lazy_static::lazy_static;
use scraper::{Html, Selector};
use url::Url;

const COURSE_PATH_MARKER: &str = "/course/";

lazy_static! {
    static ref COURSE_CARD: Selector = Selector::parse("div.coc-course").expect("static selector");
}

#[derive(Debug, Clone, PartialEq)]
pub struct Course {
    pub display_name: String,
    pub source_url: Url,
}

/// Reads the courses off the landing page, in page order. Only links inside
/// course cards that point at a course page count. A course name seen twice
/// keeps its first position and takes the later URL.
pub fn list_courses(landing_page: &Html, page_url: &Url) -> Vec<Course> {
    let mut courses: Vec<Course> = Vec::new();
    for anchor in anchors_within(landing_page, &COURSE_CARD, page_url) {
        if !anchor.url.as_str().contains(COURSE_PATH_MARKER) {
            continue;
        }
        let display_name = match anchor.title {
            Some(title) if !title.trim().is_empty() => title.trim().to_string(),
            _ => anchor.text,
        };
        if display_name.is_empty() {
            tracing::warn!("Skipping course link without a name : {}", anchor.url);
            continue;
        }
        match courses.iter_mut().find(|c| c.display_name == display_name) {
            Some(existing) => existing.source_url = anchor.url,
            None => courses.push(Course {
                display_name,
                source_url: anchor.url,
            }),
        }
    }
    courses
}
