use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::{
    EventFrameAttached, EventFrameNavigated, EventFrameStoppedLoading, FrameId, NavigateParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::Page;
use futures::{stream, Stream, StreamExt};
use log::debug;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

use crate::config::BrowserOptions;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const RECHECK_INTERVAL: Duration = Duration::from_millis(250);

// A launched browser with the single page the scraper drives.
pub struct Session {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Page,
}

impl Session {
    // Launches Chromium, spawns its CDP event handler and opens one blank page.
    pub async fn launch(options: &BrowserOptions) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions");
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &options.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        // The handler must be polled for any page command to make progress.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("browser handler: {e}");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("failed to open a page")?;

        Ok(Self {
            browser,
            handler,
            page,
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    // Closes the browser and stops the handler task, even if closing fails.
    pub async fn close(mut self) -> Result<()> {
        let closed = self.browser.close().await;
        if closed.is_ok() {
            if let Err(e) = self.browser.wait().await {
                debug!("waiting for the browser process: {e}");
            }
        }
        self.handler.abort();
        closed.context("failed to close browser")?;
        Ok(())
    }
}

// Identifies an embedded frame by its name and, optionally, the frame it is nested in.
#[derive(Debug, Clone, Copy)]
pub struct FrameQuery<'a> {
    pub name: &'a str,
    pub parent: Option<&'a FrameId>,
}

impl<'a> FrameQuery<'a> {
    pub fn named(name: &'a str) -> Self {
        Self { name, parent: None }
    }

    pub fn child_of(name: &'a str, parent: &'a FrameId) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }
}

pub async fn main_frame(page: &Page) -> Result<FrameId> {
    page.mainframe()
        .await?
        .context("page has no main frame")
}

async fn find_frame(page: &Page, query: &FrameQuery<'_>) -> Result<Option<FrameId>> {
    for frame in page.frames().await? {
        if page.frame_name(frame.clone()).await?.as_deref() != Some(query.name) {
            continue;
        }
        if let Some(parent) = query.parent {
            if page.frame_parent(frame.clone()).await?.as_ref() != Some(parent) {
                continue;
            }
        }
        return Ok(Some(frame));
    }
    Ok(None)
}

async fn discover_frame<S>(page: &Page, query: &FrameQuery<'_>, changes: &mut S) -> Result<FrameId>
where
    S: Stream<Item = ()> + Unpin,
{
    loop {
        if let Some(frame) = find_frame(page, query).await? {
            return Ok(frame);
        }
        // Re-check on the next frame event, or after a short tick if none arrives.
        if let Ok(None) = timeout(RECHECK_INTERVAL, changes.next()).await {
            bail!("page closed while waiting for frame {:?}", query.name);
        }
    }
}

// Resolves once a frame matching `query` exists in the page, or fails after `limit`.
pub async fn wait_for_frame(page: &Page, query: FrameQuery<'_>, limit: Duration) -> Result<FrameId> {
    let attached = page.event_listener::<EventFrameAttached>().await?;
    let navigated = page.event_listener::<EventFrameNavigated>().await?;
    let mut changes = stream::select(attached.map(|_| ()), navigated.map(|_| ()));

    match timeout(limit, discover_frame(page, &query, &mut changes)).await {
        Ok(found) => found,
        Err(_) => bail!("frame {:?} did not appear within {:?}", query.name, limit),
    }
}

// Evaluates `expression` inside the frame's own document. `None` means the frame has
// no execution context yet (it is still loading).
pub async fn evaluate_in_frame<T>(page: &Page, frame: &FrameId, expression: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
{
    let Some(context) = page.frame_execution_context(frame.clone()).await? else {
        return Ok(None);
    };
    let params = EvaluateParams::builder()
        .expression(expression)
        .context_id(context)
        .return_by_value(true)
        .await_promise(true)
        .build()
        .map_err(|e| anyhow!("invalid evaluation parameters: {e}"))?;

    let result = page
        .evaluate_expression(params)
        .await
        .context("script evaluation failed")?;
    let value = result
        .into_value()
        .context("failed to convert script result")?;
    Ok(Some(value))
}

fn selector_probe(selector: &str) -> Result<String> {
    Ok(format!(
        "document.querySelector({}) !== null",
        serde_json::to_string(selector)?
    ))
}

// Polls the frame until an element matching `selector` exists.
pub async fn wait_for_selector(
    page: &Page,
    frame: &FrameId,
    selector: &str,
    limit: Duration,
) -> Result<()> {
    let probe = selector_probe(selector)?;
    let deadline = Instant::now() + limit;

    loop {
        match evaluate_in_frame::<bool>(page, frame, &probe).await {
            Ok(Some(true)) => return Ok(()),
            Ok(_) => {}
            // Contexts are torn down while a frame navigates; keep polling.
            Err(e) => debug!("probing {selector:?}: {e:#}"),
        }
        if Instant::now() >= deadline {
            bail!("selector {selector:?} did not appear within {limit:?}");
        }
        sleep(POLL_INTERVAL).await;
    }
}

// Points a child frame at `url` and waits until that frame stops loading.
pub async fn navigate_frame(page: &Page, frame: &FrameId, url: &str, limit: Duration) -> Result<()> {
    let mut stopped = page.event_listener::<EventFrameStoppedLoading>().await?;

    let params = NavigateParams::builder()
        .url(url)
        .frame_id(frame.clone())
        .build()
        .map_err(|e| anyhow!("invalid navigation parameters: {e}"))?;
    let response = page
        .execute(params)
        .await
        .with_context(|| format!("failed to navigate frame to {url}"))?;
    if let Some(error) = &response.result.error_text {
        bail!("navigation to {url} failed: {error}");
    }

    let finished = async {
        while let Some(event) = stopped.next().await {
            if &event.frame_id == frame {
                return true;
            }
        }
        false
    };
    match timeout(limit, finished).await {
        Ok(true) => Ok(()),
        Ok(false) => bail!("page closed while the frame was loading {url}"),
        Err(_) => bail!("frame navigation to {url} did not finish within {limit:?}"),
    }
}

// Clicks `selector` and waits for the main frame to navigate away and finish loading.
// The listener is registered before the click so a navigation that starts late is not missed.
pub async fn click_and_wait_for_navigation(page: &Page, selector: &str, limit: Duration) -> Result<()> {
    let mut navigated = page.event_listener::<EventFrameNavigated>().await?;

    page.find_element(selector).await?.click().await?;

    let main_frame_navigated = async {
        while let Some(event) = navigated.next().await {
            if event.frame.parent_id.is_none() {
                return true;
            }
        }
        false
    };
    match timeout(limit, main_frame_navigated).await {
        Ok(true) => {}
        Ok(false) => bail!("page closed before clicking {selector:?} navigated"),
        Err(_) => bail!("clicking {selector:?} did not navigate within {limit:?}"),
    }
    page.wait_for_navigation().await?;
    Ok(())
}

// Serialized HTML of the frame's current document.
pub async fn frame_html(page: &Page, frame: &FrameId) -> Result<String> {
    evaluate_in_frame::<String>(page, frame, "document.documentElement.outerHTML")
        .await?
        .context("frame has no document to read")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_probe_quotes_the_selector() {
        assert_eq!(
            selector_probe("#grades_wrapper").unwrap(),
            r##"document.querySelector("#grades_wrapper") !== null"##
        );
        assert_eq!(
            selector_probe(r#"a[title="x"]"#).unwrap(),
            r#"document.querySelector("a[title=\"x\"]") !== null"#
        );
    }

    #[test]
    fn frame_queries() {
        let parent = FrameId::new("parent");
        let top = FrameQuery::named("mybbCanvas");
        assert!(top.parent.is_none());
        let child = FrameQuery::child_of("right_stream_mygrades", &parent);
        assert_eq!(child.parent, Some(&parent));
    }

    fn options() -> BrowserOptions {
        BrowserOptions {
            headless: true,
            executable: None,
        }
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn frame_appearing_later_is_found() {
        let session = Session::launch(&options()).await.expect("launch failed");
        let page = session.page();
        page.goto("about:blank").await.unwrap();
        page.evaluate(
            "setTimeout(() => { const f = document.createElement('iframe'); \
             f.name = 'late'; f.srcdoc = '<p id=\"inside\">hi</p>'; \
             document.body.appendChild(f); }, 300)",
        )
        .await
        .unwrap();

        let frame = wait_for_frame(page, FrameQuery::named("late"), Duration::from_secs(10))
            .await
            .expect("frame should attach");
        wait_for_selector(page, &frame, "#inside", Duration::from_secs(10))
            .await
            .expect("selector should appear");
        let html = frame_html(page, &frame).await.unwrap();
        assert!(html.contains("hi"));

        session.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn click_waits_for_a_navigation_that_starts_late() {
        let session = Session::launch(&options()).await.expect("launch failed");
        let page = session.page();
        page.set_content(
            "<button id=\"go\" onclick=\"setTimeout(() => location.reload(), 300)\">go</button>",
        )
        .await
        .unwrap();

        click_and_wait_for_navigation(page, "#go", Duration::from_secs(10))
            .await
            .expect("reload should be awaited");
        let button_left: bool = page
            .evaluate("document.getElementById('go') !== null")
            .await
            .unwrap()
            .into_value()
            .unwrap();
        assert!(!button_left);

        session.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn click_without_navigation_times_out() {
        let session = Session::launch(&options()).await.expect("launch failed");
        let page = session.page();
        page.set_content("<button id=\"stay\">stay</button>").await.unwrap();

        let err = click_and_wait_for_navigation(page, "#stay", Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not navigate"));

        session.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn missing_frame_times_out() {
        let session = Session::launch(&options()).await.expect("launch failed");
        let page = session.page();
        let err = wait_for_frame(page, FrameQuery::named("never"), Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not appear"));
        session.close().await.unwrap();
    }
}
