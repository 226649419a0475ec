//! Test doubles: recording function mocks, fetch interception and a cookie
//! document.

pub mod cookie;
pub mod fetch;
pub mod function;

pub use cookie::{create_cookie_document, Cookie, CookieDocument, SameSite};
pub use fetch::{
    current_fetcher, fetch, install_fetcher, mock_fetch, CapturedRequest, FetchMock,
    FetchRequest, FetchResponse, Fetcher, HttpMethod, MockFetchOptions, MockResponse,
    NetworkFetcher, UrlPattern,
};
pub use function::{expect_mock, fn_mock, spy, ExpectMock, MockCall, MockFn, MockOutcome};
