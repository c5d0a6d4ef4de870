//! OpenShift / Kubernetes API client.
//!
//! Authenticates with the pod's service account, a kubeconfig file, or a
//! username and password exchanged for a bearer token through the
//! OpenShift OAuth server. Objects are addressed by `(api_version, kind)`
//! through API discovery, so any resource type can be listed or changed.

use std::path::PathBuf;
use std::time::Duration;

use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{
    Api, AttachParams, DeleteParams, DynamicObject, GroupVersionKind, ListParams, PostParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::{self, Scope};
use kube::runtime::wait::{await_condition, conditions};
use kube::{Client, Config};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// OAuth client allowed to answer basic-auth challenges.
const CHALLENGING_CLIENT: &str = "openshift-challenging-client";

/// How long to wait for a deleted pod to disappear before recreating it.
const POD_DELETE_TIMEOUT: Duration = Duration::from_secs(60);

/// How the client authenticates to the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum OcpAuth {
    /// Token and CA mounted into the running pod.
    ServiceAccount,
    /// A kubeconfig file.
    KubeConfig { path: PathBuf },
    /// OpenShift OAuth login. The password is prompted for when unset.
    Password {
        username: String,
        #[serde(default)]
        password: Option<String>,
    },
}

/// Cluster connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OcpSettings {
    /// API server URL, used by password authentication.
    pub api_url: String,
    pub namespace: String,
    pub auth: OcpAuth,
    /// Validate the API server certificate.
    pub verify_ssl: bool,
    /// CA bundle used for TLS validation.
    pub ssl_ca_cert: Option<PathBuf>,
    /// Resource listed by the demo.
    pub api_version: String,
    pub kind: String,
}

impl Default for OcpSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.okd.clustername.local:6443".to_string(),
            namespace: "default".to_string(),
            auth: OcpAuth::ServiceAccount,
            verify_ssl: false,
            ssl_ca_cert: None,
            api_version: "v1".to_string(),
            kind: "Pod".to_string(),
        }
    }
}

/// Token obtained from the OAuth server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthToken {
    pub access_token: String,
    pub expires_in: Option<u64>,
}

/// Name and status phase of a listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub name: String,
    pub phase: Option<String>,
}

/// Outcome of [`OcpClient::create_pod`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodCreation {
    Created,
    /// A pod with that name is already running; nothing was changed.
    AlreadyRunning,
    /// A stale pod with that name was deleted and replaced.
    Recreated,
}

/// Outcome of [`OcpClient::create_cronjob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronJobCreation {
    Created,
    AlreadyExists,
}

/// Splits `group/version` into its parts; the core group is empty.
#[must_use]
pub fn parse_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

/// Extracts the token from an OAuth redirect `Location` fragment.
///
/// # Errors
/// Returns [`Error::Authentication`] if the fragment carries an error or
/// no access token.
pub fn parse_token_fragment(location: &str) -> Result<OAuthToken> {
    let fragment = location.split_once('#').map_or("", |(_, f)| f);

    let mut access_token = None;
    let mut expires_in = None;
    let mut oauth_error = None;
    for pair in fragment.split('&') {
        match pair.split_once('=') {
            Some(("access_token", v)) => access_token = Some(v.to_string()),
            Some(("expires_in", v)) => expires_in = v.parse().ok(),
            Some(("error", v)) => oauth_error = Some(v.to_string()),
            _ => {}
        }
    }

    if let Some(e) = oauth_error {
        return Err(Error::Authentication(format!("OAuth server returned {}", e)));
    }
    match access_token {
        Some(access_token) if !access_token.is_empty() => Ok(OAuthToken {
            access_token,
            expires_in,
        }),
        _ => Err(Error::Authentication(
            "no access token in OAuth redirect".to_string(),
        )),
    }
}

/// Maps an HTTP status from the API server.
fn error_for_status(code: u16, message: String) -> Error {
    match code {
        401 => Error::Authentication(message),
        403 => Error::PermissionDenied(message),
        404 => Error::NotFound(message),
        409 => Error::Conflict(message),
        _ => Error::Operation(message),
    }
}

fn map_kube_error(action: &str, e: kube::Error) -> Error {
    match e {
        kube::Error::Api(response) => error_for_status(
            response.code,
            format!("{}: {} ({})", action, response.message, response.reason),
        ),
        kube::Error::SerdeError(e) => Error::Operation(format!("{}: {}", action, e)),
        other => Error::Connection(format!("{}: {}", action, other)),
    }
}

fn map_reqwest_error(action: &str, e: &reqwest::Error) -> Error {
    match e.status() {
        Some(status) => error_for_status(status.as_u16(), format!("{}: {}", action, e)),
        None => Error::Connection(format!("{}: {}", action, e)),
    }
}

/// Builds a single-context kubeconfig for a bearer token.
fn token_kubeconfig(settings: &OcpSettings, token: &str) -> Value {
    let mut cluster = json!({
        "server": settings.api_url,
        "insecure-skip-tls-verify": !settings.verify_ssl,
    });
    if let Some(ref ca) = settings.ssl_ca_cert {
        cluster["certificate-authority"] = json!(ca.to_string_lossy());
    }
    json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{"name": "ocp", "cluster": cluster}],
        "users": [{"name": "ocp-user", "user": {"token": token}}],
        "contexts": [{
            "name": "ocp",
            "context": {"cluster": "ocp", "user": "ocp-user", "namespace": settings.namespace},
        }],
        "current-context": "ocp",
    })
}

fn phase_of(object: &DynamicObject) -> Option<String> {
    object
        .data
        .get("status")
        .and_then(|s| s.get("phase"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Performs the OpenShift OAuth challenge flow.
async fn request_token(settings: &OcpSettings, username: &str, password: &str) -> Result<OAuthToken> {
    let mut builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .danger_accept_invalid_certs(!settings.verify_ssl);
    if let Some(ref ca) = settings.ssl_ca_cert {
        let pem = std::fs::read(ca)?;
        let cert = reqwest::Certificate::from_pem(&pem)
            .map_err(|e| Error::InvalidInput(format!("invalid CA bundle: {}", e)))?;
        builder = builder.add_root_certificate(cert);
    }
    let http = builder
        .build()
        .map_err(|e| Error::Connection(e.to_string()))?;

    let discovery_url = format!(
        "{}/.well-known/oauth-authorization-server",
        settings.api_url.trim_end_matches('/')
    );
    debug!("Discovering OAuth server at {}", discovery_url);
    let metadata: Value = http
        .get(&discovery_url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| map_reqwest_error("OAuth discovery", &e))?
        .json()
        .await
        .map_err(|e| map_reqwest_error("OAuth discovery", &e))?;
    let endpoint = metadata
        .get("authorization_endpoint")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Operation("OAuth metadata has no authorization_endpoint".to_string()))?;

    let response = http
        .get(endpoint)
        .query(&[("response_type", "token"), ("client_id", CHALLENGING_CLIENT)])
        .basic_auth(username, Some(password))
        .header("X-CSRF-Token", "1")
        .send()
        .await
        .map_err(|e| map_reqwest_error("OAuth token request", &e))?;

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Error::Authentication(format!(
            "OAuth server refused credentials for {}",
            username
        )));
    }
    if !status.is_redirection() {
        return Err(error_for_status(
            status.as_u16(),
            format!("unexpected OAuth response: {}", status),
        ));
    }

    let location = response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Authentication("OAuth redirect without Location".to_string()))?;
    parse_token_fragment(location)
}

/// A connected cluster client scoped to one namespace.
pub struct OcpClient {
    client: Client,
    namespace: String,
}

impl OcpClient {
    /// Builds a client for the configured auth mode and checks the API server.
    ///
    /// # Errors
    /// Returns [`Error::Authentication`] when login is refused and
    /// [`Error::Connection`] when the cluster cannot be reached.
    pub async fn connect(settings: &OcpSettings) -> Result<Self> {
        debug!("Connecting to the Openshift Cluster...");
        let config = Self::load_config(settings).await?;
        let client = Client::try_from(config).map_err(|e| map_kube_error("client setup", e))?;

        let version = client.apiserver_version().await.map_err(|e| {
            let err = map_kube_error("API server version", e);
            error!("Connection error, failed to connect to the cluster: {}", err);
            err
        })?;
        info!(
            "Connected to the Openshift Cluster via url: {} (server {})",
            settings.api_url, version.git_version
        );

        Ok(Self {
            client,
            namespace: settings.namespace.clone(),
        })
    }

    async fn load_config(settings: &OcpSettings) -> Result<Config> {
        let mut config = match settings.auth {
            OcpAuth::ServiceAccount => {
                info!("Using service account of the pod to access the cluster");
                Config::incluster().map_err(|e| {
                    error!("In-cluster configuration unavailable: {}", e);
                    Error::Connection(e.to_string())
                })?
            }
            OcpAuth::KubeConfig { ref path } => {
                info!("Loading kube config file: {}", path.display());
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    error!("Failed to load kube config file: {}", e);
                    Error::InvalidInput(e.to_string())
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| Error::InvalidInput(e.to_string()))?
            }
            OcpAuth::Password {
                ref username,
                ref password,
            } => {
                info!("Using user and password to access the cluster");
                let token =
                    request_token(settings, username, password.as_deref().unwrap_or_default())
                        .await
                        .map_err(|e| {
                            error!("Error while authenticating: {}", e);
                            e
                        })?;
                if let Some(secs) = token.expires_in {
                    debug!("Login token will expire in {} seconds", secs);
                }
                let kubeconfig: Kubeconfig =
                    serde_json::from_value(token_kubeconfig(settings, &token.access_token))?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| Error::InvalidInput(e.to_string()))?
            }
        };
        config.default_namespace = settings.namespace.clone();
        Ok(config)
    }

    async fn dynamic_api(&self, api_version: &str, kind: &str) -> Result<Api<DynamicObject>> {
        let (group, version) = parse_api_version(api_version);
        let gvk = GroupVersionKind::gvk(group, version, kind);
        let (resource, capabilities) = discovery::pinned_kind(&self.client, &gvk)
            .await
            .map_err(|e| {
                let err = map_kube_error(&format!("discover {}/{}", api_version, kind), e);
                error!("{}", err);
                err
            })?;
        Ok(match capabilities.scope {
            Scope::Cluster => Api::all_with(self.client.clone(), &resource),
            Scope::Namespaced => {
                Api::namespaced_with(self.client.clone(), &self.namespace, &resource)
            }
        })
    }

    /// Lists every object of a kind in the namespace.
    ///
    /// # Errors
    /// Returns error if discovery or the list call fails.
    pub async fn list_objects(&self, api_version: &str, kind: &str) -> Result<Vec<ObjectSummary>> {
        let api = self.dynamic_api(api_version, kind).await?;
        let list = api.list(&ListParams::default()).await.map_err(|e| {
            let err = map_kube_error(&format!("list {}", kind), e);
            error!("Failed to list all objects: {}", err);
            err
        })?;

        info!(
            "Found {} objects in the namespace {}",
            list.items.len(),
            self.namespace
        );
        Ok(list
            .items
            .iter()
            .map(|obj| {
                let summary = ObjectSummary {
                    name: obj.metadata.name.clone().unwrap_or_default(),
                    phase: phase_of(obj),
                };
                debug!("Object: {} status: {:?}", summary.name, summary.phase);
                summary
            })
            .collect())
    }

    /// Fetches one object by name.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if it does not exist.
    pub async fn get_object(&self, api_version: &str, kind: &str, name: &str) -> Result<DynamicObject> {
        debug!("Getting object name {}", name);
        let api = self.dynamic_api(api_version, kind).await?;
        api.get(name).await.map_err(|e| {
            let err = map_kube_error(&format!("get {} {}", kind, name), e);
            error!("{}", err);
            err
        })
    }

    /// Creates an object from its JSON manifest.
    ///
    /// # Errors
    /// Returns [`Error::Conflict`] if it already exists.
    pub async fn create_object(&self, api_version: &str, kind: &str, manifest: Value) -> Result<DynamicObject> {
        let api = self.dynamic_api(api_version, kind).await?;
        let object: DynamicObject = serde_json::from_value(manifest)?;
        api.create(&PostParams::default(), &object)
            .await
            .map_err(|e| map_kube_error(&format!("create {}", kind), e))
    }

    /// Deletes an object by name.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if it does not exist.
    pub async fn delete_object(&self, api_version: &str, kind: &str, name: &str) -> Result<()> {
        let api = self.dynamic_api(api_version, kind).await?;
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error(&format!("delete {} {}", kind, name), e))?;
        info!("Deleted {} [{}]", kind, name);
        Ok(())
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn cronjobs(&self) -> Api<CronJob> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Creates a pod, replacing a same-named pod that is not running.
    ///
    /// # Errors
    /// Returns error if the manifest is invalid or a call fails.
    pub async fn create_pod(&self, name: &str, manifest: Value) -> Result<PodCreation> {
        let pod: Pod = serde_json::from_value(manifest)?;
        let pods = self.pods();

        info!("Creating pod {}", name);
        let err = match pods.create(&PostParams::default(), &pod).await {
            Ok(_) => {
                info!("Created pod [{}]", name);
                return Ok(PodCreation::Created);
            }
            Err(e) => map_kube_error(&format!("create pod {}", name), e),
        };
        if err.kind() != crate::ErrorKind::Conflict {
            error!("Failed to create pod: {}", err);
            return Err(err);
        }

        info!("Pod [{}] already exists, checking pod status...", name);
        let existing = pods
            .get(name)
            .await
            .map_err(|e| map_kube_error(&format!("get pod {}", name), e))?;
        let running = existing
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            == Some("Running");
        if running {
            warn!(
                "An instance of pod [{}] is running, skipping the creation of pod!",
                name
            );
            return Ok(PodCreation::AlreadyRunning);
        }

        info!("No running pod [{}] found, recreating it", name);
        self.delete_pod(name).await?;
        if let Some(uid) = existing.metadata.uid.as_deref() {
            let gone = await_condition(pods.clone(), name, conditions::is_deleted(uid));
            if tokio::time::timeout(POD_DELETE_TIMEOUT, gone).await.is_err() {
                warn!("Pod [{}] still terminating after {:?}", name, POD_DELETE_TIMEOUT);
            }
        }
        pods.create(&PostParams::default(), &pod)
            .await
            .map_err(|e| map_kube_error(&format!("recreate pod {}", name), e))?;
        info!("Recreated pod [{}]", name);
        Ok(PodCreation::Recreated)
    }

    /// Deletes a pod.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if it does not exist.
    pub async fn delete_pod(&self, name: &str) -> Result<()> {
        debug!("Deleting pod {}", name);
        self.pods()
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| {
                let err = map_kube_error(&format!("delete pod {}", name), e);
                error!("Failed to delete pod: {}", err);
                err
            })?;
        info!("Deleted pod [{}]", name);
        Ok(())
    }

    /// Creates a cron job unless one with that name exists.
    ///
    /// # Errors
    /// Returns error if the manifest is invalid or the call fails.
    pub async fn create_cronjob(&self, name: &str, manifest: Value) -> Result<CronJobCreation> {
        let cronjob: CronJob = serde_json::from_value(manifest)?;
        debug!("Creating cronjob {}", name);
        match self.cronjobs().create(&PostParams::default(), &cronjob).await {
            Ok(_) => {
                info!("Created cronjob [{}]", name);
                Ok(CronJobCreation::Created)
            }
            Err(e) => {
                let err = map_kube_error(&format!("create cronjob {}", name), e);
                if err.kind() == crate::ErrorKind::Conflict {
                    info!("Cronjob [{}] already exists, skipping", name);
                    Ok(CronJobCreation::AlreadyExists)
                } else {
                    error!("Failed to create cronjob: {}", err);
                    Err(err)
                }
            }
        }
    }

    /// Deletes a cron job.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if it does not exist.
    pub async fn delete_cronjob(&self, name: &str) -> Result<()> {
        debug!("Deleting cronjob {}", name);
        self.cronjobs()
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| {
                let err = map_kube_error(&format!("delete cronjob {}", name), e);
                error!("Failed to delete cronjob: {}", err);
                err
            })?;
        info!("Deleted cronjob [{}]", name);
        Ok(())
    }

    /// Runs a command in a pod and returns its stdout followed by stderr.
    ///
    /// # Errors
    /// Returns error if the exec session cannot be opened.
    pub async fn exec_in_pod(&self, name: &str, command: &[&str]) -> Result<String> {
        debug!("Executing command {:?} inside pod {}", command, name);
        let params = AttachParams::default()
            .stdin(false)
            .stdout(true)
            .stderr(true)
            .tty(false);
        let mut attached = self
            .pods()
            .exec(name, command.iter().copied(), &params)
            .await
            .map_err(|e| {
                let err = map_kube_error(&format!("exec in pod {}", name), e);
                error!("Failed to execute command inside pod: {}", err);
                err
            })?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let out_reader = attached.stdout();
        let err_reader = attached.stderr();
        let (out, err) = tokio::join!(
            async {
                match out_reader {
                    Some(mut r) => r.read_to_string(&mut stdout).await.map(|_| ()),
                    None => Ok(()),
                }
            },
            async {
                match err_reader {
                    Some(mut r) => r.read_to_string(&mut stderr).await.map(|_| ()),
                    None => Ok(()),
                }
            }
        );
        out?;
        err?;
        attached
            .join()
            .await
            .map_err(|e| Error::Operation(format!("exec in pod {}: {}", name, e)))?;

        stdout.push_str(&stderr);
        Ok(stdout)
    }

    /// Releases the client. Pending watches and exec streams are dropped.
    pub fn close(self) {
        debug!("Closing the connection to namespace {}...", self.namespace);
        drop(self.client);
        info!("OpenShift client closed.");
    }
}
