// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface for making requests to the testbed's cluster-management API
//!
//! The API is organized by site: reservations ("jobs") and image
//! installations ("deployments") are created, viewed, and deleted beneath
//! `/sites/{site}`.

use reqwest::Method;
use reqwest::StatusCode;
use slog::Logger;
use slog::debug;
use std::time::Duration;
use thiserror::Error;

pub mod types;

mod path_support {
    use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

    const PATH_SET: &AsciiSet = &CONTROLS
        .add(b' ')
        .add(b'"')
        .add(b'#')
        .add(b'/')
        .add(b'<')
        .add(b'>')
        .add(b'?')
        .add(b'`')
        .add(b'{')
        .add(b'}');

    pub(crate) fn encode_path(pc: &str) -> String {
        utf8_percent_encode(pc, PATH_SET).to_string()
    }
}

use path_support::encode_path;

/// Errors returned by [`Client`] operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to build HTTP client")]
    Build(#[source] reqwest::Error),
    #[error("{method} {url}: request failed")]
    Request {
        method: Method,
        url: String,
        #[source]
        err: reqwest::Error,
    },
    #[error("{method} {url}: server responded {status}: {message}")]
    Status { method: Method, url: String, status: StatusCode, message: String },
}

impl Error {
    /// Returns the HTTP status code, if the server responded with one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Status { status, .. } => Some(*status),
            Error::Build(_) | Error::Request { .. } => None,
        }
    }
}

/// Username and password for HTTP basic authentication.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub struct Client {
    baseurl: String,
    client: reqwest::Client,
    credentials: Option<Credentials>,
    log: Logger,
}

impl Client {
    /// Create a client for the API rooted at `baseurl`.
    pub fn new(
        baseurl: &str,
        credentials: Option<Credentials>,
        log: Logger,
    ) -> Result<Client, Error> {
        let client = reqwest::ClientBuilder::new()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(Error::Build)?;
        Ok(Client::new_with_client(baseurl, client, credentials, log))
    }

    pub fn new_with_client(
        baseurl: &str,
        client: reqwest::Client,
        credentials: Option<Credentials>,
        log: Logger,
    ) -> Client {
        let baseurl = baseurl.trim_end_matches('/').to_string();
        Client { baseurl, client, credentials, log }
    }

    pub fn baseurl(&self) -> &str {
        &self.baseurl
    }

    /// site_list: GET /sites
    pub async fn site_list(&self) -> Result<Vec<types::Site>, Error> {
        let url = format!("{}/sites", self.baseurl);
        let res = self.send(Method::GET, url, None::<&()>).await?;
        Ok(Self::json::<types::Collection<types::Site>>(res).await?.items)
    }

    /// site_status: GET /sites/{site}/status
    pub async fn site_status(
        &self,
        site: &str,
    ) -> Result<Vec<types::NodeStatus>, Error> {
        let url = format!("{}/sites/{}/status", self.baseurl, encode_path(site));
        let res = self.send(Method::GET, url, None::<&()>).await?;
        Ok(Self::json::<types::Collection<types::NodeStatus>>(res).await?.items)
    }

    /// job_submit: POST /sites/{site}/jobs
    pub async fn job_submit(
        &self,
        site: &str,
        body: &types::JobSubmit,
    ) -> Result<types::Job, Error> {
        let url = format!("{}/sites/{}/jobs", self.baseurl, encode_path(site));
        let res = self.send(Method::POST, url, Some(body)).await?;
        Self::json(res).await
    }

    /// job_view: GET /sites/{site}/jobs/{uid}
    pub async fn job_view(
        &self,
        site: &str,
        uid: u64,
    ) -> Result<types::Job, Error> {
        let url =
            format!("{}/sites/{}/jobs/{}", self.baseurl, encode_path(site), uid);
        let res = self.send(Method::GET, url, None::<&()>).await?;
        Self::json(res).await
    }

    /// job_delete: DELETE /sites/{site}/jobs/{uid}
    ///
    /// Deleting a job the server no longer knows about is not an error.
    pub async fn job_delete(&self, site: &str, uid: u64) -> Result<(), Error> {
        let url =
            format!("{}/sites/{}/jobs/{}", self.baseurl, encode_path(site), uid);
        self.delete(url).await
    }

    /// deployment_submit: POST /sites/{site}/deployments
    pub async fn deployment_submit(
        &self,
        site: &str,
        body: &types::DeploymentSubmit,
    ) -> Result<types::Deployment, Error> {
        let url =
            format!("{}/sites/{}/deployments", self.baseurl, encode_path(site));
        let res = self.send(Method::POST, url, Some(body)).await?;
        Self::json(res).await
    }

    /// deployment_view: GET /sites/{site}/deployments/{uid}
    pub async fn deployment_view(
        &self,
        site: &str,
        uid: &str,
    ) -> Result<types::Deployment, Error> {
        let url = format!(
            "{}/sites/{}/deployments/{}",
            self.baseurl,
            encode_path(site),
            encode_path(uid),
        );
        let res = self.send(Method::GET, url, None::<&()>).await?;
        Self::json(res).await
    }

    /// deployment_delete: DELETE /sites/{site}/deployments/{uid}
    ///
    /// Deleting a deployment the server no longer knows about is not an
    /// error.
    pub async fn deployment_delete(
        &self,
        site: &str,
        uid: &str,
    ) -> Result<(), Error> {
        let url = format!(
            "{}/sites/{}/deployments/{}",
            self.baseurl,
            encode_path(site),
            encode_path(uid),
        );
        self.delete(url).await
    }

    async fn delete(&self, url: String) -> Result<(), Error> {
        match self.send(Method::DELETE, url, None::<&()>).await {
            Ok(_) => Ok(()),
            Err(error) if error.status() == Some(StatusCode::NOT_FOUND) => {
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    async fn send<B: serde::Serialize + ?Sized>(
        &self,
        method: Method,
        url: String,
        body: Option<&B>,
    ) -> Result<Response, Error> {
        let mut builder = self
            .client
            .request(method.clone(), &url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(credentials) = &self.credentials {
            builder = builder.basic_auth(
                &credentials.username,
                Some(&credentials.password),
            );
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        debug!(self.log, "client request";
            "method" => %method,
            "uri" => &url,
        );
        let result = builder.send().await;
        debug!(self.log, "client response"; "result" => ?result);

        let response = result.map_err(|err| Error::Request {
            method: method.clone(),
            url: url.clone(),
            err,
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(Response { method, url, inner: response });
        }

        // The body is only used to make the error more useful; failing to
        // read it should not mask the status.
        let message = response.text().await.unwrap_or_default();
        Err(Error::Status { method, url, status, message })
    }

    async fn json<T: serde::de::DeserializeOwned>(
        res: Response,
    ) -> Result<T, Error> {
        let Response { method, url, inner } = res;
        inner.json().await.map_err(|err| Error::Request { method, url, err })
    }
}

struct Response {
    method: Method,
    url: String,
    inner: reqwest::Response,
}
