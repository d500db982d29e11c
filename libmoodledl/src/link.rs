use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Selector};
use tracing::{event, instrument, Level};
use url::{ParseError, Url};

const FORCE_DOWNLOAD_PARAM: &str = "forcedownload";

lazy_static! {
    static ref ANCHOR: Selector = Selector::parse("a[href]").expect("static selector");
}

/// A hyperlink found on a portal page.
#[derive(Debug, Clone, PartialEq)]
pub struct Anchor {
    /// Target resolved against the page the link was found on
    pub url: Url,
    /// Visible link text with whitespace collapsed
    pub text: String,
    pub title: Option<String>,
}

#[instrument]
/// Get the full link to a sub-page or file, given a page's full url.
pub fn get_full_link(link: &str, page_url: &Url) -> Option<Url> {
    let link = link.trim();
    if link.is_empty() {
        return None;
    }
    match Url::parse(link) {
        Ok(url) => Some(url),
        Err(e)
            if e == ParseError::EmptyHost
                || e == ParseError::RelativeUrlWithoutBase
                || e == ParseError::RelativeUrlWithCannotBeABaseBase =>
        {
            page_url.join(link).ok()
        }
        Err(e) => {
            event!(Level::ERROR, "Failed to get full link for {}", link);
            event!(Level::ERROR, "{}", e);
            None
        }
    }
}

/// Every hyperlink inside the elements matched by `container`, in document
/// order. Links whose target can't be resolved are dropped.
pub fn anchors_within(document: &Html, container: &Selector, page_url: &Url) -> Vec<Anchor> {
    document
        .select(container)
        .flat_map(|element| element.select(&ANCHOR))
        .filter_map(|element| {
            let href = element.value().attr("href")?;
            let url = get_full_link(href, page_url)?;
            tracing::debug!("Full link for {} => {}", href, &url);
            Some(Anchor {
                url,
                text: element_text(element),
                title: element.value().attr("title").map(str::to_string),
            })
        })
        .collect()
}

/// Text content of an element and its descendants, whitespace collapsed.
pub fn element_text(element: ElementRef) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Removes the `forcedownload` query parameter, dropping the query entirely
/// when nothing else is left in it. The remaining parameters are kept
/// byte for byte.
pub fn strip_force_download(url: &Url) -> Url {
    let query = match url.query() {
        Some(q) => q,
        None => return url.clone(),
    };
    let segments: Vec<&str> = query.split('&').collect();
    let kept: Vec<&str> = segments
        .iter()
        .copied()
        .filter(|segment| {
            let key = segment.split_once('=').map_or(*segment, |(key, _)| key);
            key != FORCE_DOWNLOAD_PARAM
        })
        .collect();
    if kept.len() == segments.len() {
        return url.clone();
    }

    let mut stripped = url.clone();
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.set_query(Some(&kept.join("&")));
    }
    stripped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Url {
        Url::parse("https://moodle.example/mod/folder/view.php?id=7").unwrap()
    }

    #[test]
    fn resolves_relative_links_against_page() {
        assert_eq!(
            get_full_link("/pluginfile.php/1/a.pdf", &page()).unwrap().as_str(),
            "https://moodle.example/pluginfile.php/1/a.pdf"
        );
        assert_eq!(
            get_full_link("https://other.example/x", &page()).unwrap().as_str(),
            "https://other.example/x"
        );
        assert!(get_full_link("  ", &page()).is_none());
    }

    #[test]
    fn strips_force_download_only() {
        let url =
            Url::parse("https://moodle.example/pluginfile.php/1/a.pdf?forcedownload=1").unwrap();
        assert_eq!(
            strip_force_download(&url).as_str(),
            "https://moodle.example/pluginfile.php/1/a.pdf"
        );

        let url = Url::parse("https://moodle.example/f.php?rev=3&forcedownload=1").unwrap();
        assert_eq!(
            strip_force_download(&url).as_str(),
            "https://moodle.example/f.php?rev=3"
        );
    }

    #[test]
    fn leaves_other_parameters_untouched() {
        for raw in [
            "https://moodle.example/f.php?a=1&b",
            "https://moodle.example/f.php?name=a%20b&path=/x/y",
        ] {
            let url = Url::parse(raw).unwrap();
            assert_eq!(strip_force_download(&url).as_str(), raw);
        }

        let url =
            Url::parse("https://moodle.example/f.php?name=a%20b&forcedownload=1&flag").unwrap();
        assert_eq!(
            strip_force_download(&url).as_str(),
            "https://moodle.example/f.php?name=a%20b&flag"
        );
    }

    #[test]
    fn stripping_is_idempotent() {
        for raw in [
            "https://moodle.example/a.pdf?forcedownload=1",
            "https://moodle.example/a.pdf?x=1&forcedownload=1&y=2",
            "https://moodle.example/a.pdf",
        ] {
            let url = Url::parse(raw).unwrap();
            let once = strip_force_download(&url);
            assert_eq!(strip_force_download(&once), once);
        }
    }

    #[test]
    fn collects_anchors_in_containers_only() {
        let html = Html::parse_document(
            r#"<div class="box"><a href="/one">  One
               file </a></div>
               <a href="/outside">Outside</a>
               <div class="box"><a title="Two" href="two">Two</a><a name="no-href">x</a></div>"#,
        );
        let selector = Selector::parse("div.box").unwrap();
        let anchors = anchors_within(&html, &selector, &page());
        assert_eq!(anchors.len(), 2);
        assert_eq!(anchors[0].text, "One file");
        assert_eq!(anchors[0].url.as_str(), "https://moodle.example/one");
        assert_eq!(anchors[1].title.as_deref(), Some("Two"));
        assert_eq!(
            anchors[1].url.as_str(),
            "https://moodle.example/mod/folder/two"
        );
    }
}
