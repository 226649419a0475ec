//! Chromium over the DevTools protocol.
//!
//! With the `browser` feature this drives a real Chromium through
//! `chromiumoxide`; without it, launching fails with a descriptive error and
//! only the mock driver is usable.

use super::driver::{BrowserLauncher, BrowserProcess, LaunchOptions};
use crate::result::EnsayoResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Launches Chromium processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromiumLauncher;

#[cfg(not(feature = "browser"))]
#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, _options: &LaunchOptions) -> EnsayoResult<Arc<dyn BrowserProcess>> {
        Err(crate::result::EnsayoError::BrowserLaunch {
            message: "ensayo was built without the `browser` feature".to_string(),
        })
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, options: &LaunchOptions) -> EnsayoResult<Arc<dyn BrowserProcess>> {
        cdp::launch(options).await
    }
}

#[cfg(feature = "browser")]
mod cdp {
    use super::super::driver::{BrowserPage, BrowserProcess, LaunchOptions};
    use crate::result::{EnsayoError, EnsayoResult};
    use async_trait::async_trait;
    use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
    use chromiumoxide::cdp::js_protocol::runtime::{
        ConsoleApiCalledType, EventConsoleApiCalled, EventExceptionThrown, RemoteObject,
    };
    use chromiumoxide::page::Page as CdpPage;
    use futures::StreamExt;
    use std::sync::{Arc, Mutex, PoisonError};
    use tokio::task::JoinHandle;

    pub(super) async fn launch(options: &LaunchOptions) -> EnsayoResult<Arc<dyn BrowserProcess>> {
        let mut builder = CdpConfig::builder();
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &options.executable_path {
            builder = builder.chrome_executable(path);
        }
        builder = builder.args(options.args.iter().map(String::as_str));

        let config = builder
            .build()
            .map_err(|message| EnsayoError::BrowserLaunch { message })?;

        let (browser, mut handler) =
            CdpBrowser::launch(config)
                .await
                .map_err(|e| EnsayoError::BrowserLaunch {
                    message: e.to_string(),
                })?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        tracing::debug!("chromium launched");

        Ok(Arc::new(ChromiumProcess {
            browser: tokio::sync::Mutex::new(browser),
            handler,
        }))
    }

    #[derive(Debug)]
    struct ChromiumProcess {
        browser: tokio::sync::Mutex<CdpBrowser>,
        handler: JoinHandle<()>,
    }

    #[async_trait]
    impl BrowserProcess for ChromiumProcess {
        async fn new_page(&self) -> EnsayoResult<Arc<dyn BrowserPage>> {
            let page = self
                .browser
                .lock()
                .await
                .new_page("about:blank")
                .await
                .map_err(|e| EnsayoError::Page {
                    message: e.to_string(),
                })?;
            let console = Arc::new(Mutex::new(Vec::new()));
            let listeners = capture_console(&page, &console).await?;
            Ok(Arc::new(ChromiumPage {
                page,
                console,
                listeners,
            }))
        }

        async fn close(&self) -> EnsayoResult<()> {
            let mut browser = self.browser.lock().await;
            let closed = browser.close().await;
            let _ = browser.wait().await;
            self.handler.abort();
            closed.map(|_| ()).map_err(|e| EnsayoError::BrowserLaunch {
                message: e.to_string(),
            })
        }
    }

    fn describe(args: &[RemoteObject]) -> String {
        args.iter()
            .map(|arg| match (&arg.value, &arg.description) {
                (Some(serde_json::Value::String(s)), _) => s.clone(),
                (Some(value), _) => value.to_string(),
                (None, Some(description)) => description.clone(),
                (None, None) => String::new(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    async fn capture_console(
        page: &CdpPage,
        console: &Arc<Mutex<Vec<String>>>,
    ) -> EnsayoResult<Vec<JoinHandle<()>>> {
        let listener_error = |e: chromiumoxide::error::CdpError| EnsayoError::Page {
            message: e.to_string(),
        };
        let mut calls = page
            .event_listener::<EventConsoleApiCalled>()
            .await
            .map_err(listener_error)?;
        let mut exceptions = page
            .event_listener::<EventExceptionThrown>()
            .await
            .map_err(listener_error)?;

        let sink = Arc::clone(console);
        let console_task = tokio::spawn(async move {
            while let Some(event) = calls.next().await {
                if event.r#type == ConsoleApiCalledType::Error {
                    sink.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(describe(&event.args));
                }
            }
        });
        let sink = Arc::clone(console);
        let exception_task = tokio::spawn(async move {
            while let Some(event) = exceptions.next().await {
                let details = &event.exception_details;
                let text = details
                    .exception
                    .as_ref()
                    .and_then(|e| e.description.clone())
                    .unwrap_or_else(|| details.text.clone());
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(text);
            }
        });
        Ok(vec![console_task, exception_task])
    }

    #[derive(Debug)]
    struct ChromiumPage {
        page: CdpPage,
        console: Arc<Mutex<Vec<String>>>,
        listeners: Vec<JoinHandle<()>>,
    }

    #[async_trait]
    impl BrowserPage for ChromiumPage {
        async fn goto(&self, url: &str) -> EnsayoResult<()> {
            self.page
                .goto(url)
                .await
                .map(|_| ())
                .map_err(|e| EnsayoError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                })
        }

        async fn evaluate(&self, expression: &str) -> EnsayoResult<serde_json::Value> {
            let result = self
                .page
                .evaluate_expression(expression)
                .await
                .map_err(|e| EnsayoError::Evaluation {
                    message: e.to_string(),
                })?;
            Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
        }

        fn console_errors(&self) -> Vec<String> {
            self.console
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        async fn close(&self) -> EnsayoResult<()> {
            for listener in &self.listeners {
                listener.abort();
            }
            self.page
                .clone()
                .close()
                .await
                .map_err(|e| EnsayoError::Page {
                    message: e.to_string(),
                })
        }
    }
}
