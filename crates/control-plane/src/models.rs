use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// The four build tracks a project can produce artifacts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BuildType {
    AndroidApp,
    AndroidSource,
    IosApp,
    IosSource,
}

impl BuildType {
    pub const ALL: [BuildType; 4] = [
        BuildType::AndroidApp,
        BuildType::AndroidSource,
        BuildType::IosApp,
        BuildType::IosSource,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildType::AndroidApp => "android_app",
            BuildType::AndroidSource => "android_source",
            BuildType::IosApp => "ios_app",
            BuildType::IosSource => "ios_source",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "android_app" => Some(BuildType::AndroidApp),
            "android_source" => Some(BuildType::AndroidSource),
            "ios_app" => Some(BuildType::IosApp),
            "ios_source" => Some(BuildType::IosSource),
            _ => None,
        }
    }

    /// Repository-dispatch event type the CI pipelines listen for.
    pub fn event_type(&self) -> &'static str {
        match self {
            BuildType::AndroidApp | BuildType::IosApp => "build-app",
            BuildType::AndroidSource => "package-source",
            BuildType::IosSource => "package-ios-source",
        }
    }

    pub fn build_format(&self) -> &'static str {
        match self {
            BuildType::AndroidApp => "apk",
            BuildType::IosApp => "ipa",
            BuildType::AndroidSource | BuildType::IosSource => "source",
        }
    }

    /// Legacy mirror column on the apps row for this track.
    pub fn status_column(&self) -> &'static str {
        match self {
            BuildType::AndroidApp => "android_app_status",
            BuildType::AndroidSource => "android_source_status",
            BuildType::IosApp => "ios_app_status",
            BuildType::IosSource => "ios_source_status",
        }
    }
}

impl std::fmt::Display for BuildType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Queued,
    Building,
    Ready,
    Failed,
    Cancelled,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Queued => "queued",
            BuildStatus::Building => "building",
            BuildStatus::Ready => "ready",
            BuildStatus::Failed => "failed",
            BuildStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(BuildStatus::Queued),
            "building" => Some(BuildStatus::Building),
            "ready" => Some(BuildStatus::Ready),
            "failed" => Some(BuildStatus::Failed),
            "cancelled" => Some(BuildStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states never revert.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Ready | BuildStatus::Failed | BuildStatus::Cancelled
        )
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builder configuration blob persisted on the app row and forwarded verbatim
/// to the CI pipelines inside the dispatch payload.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct AppConfig {
    pub show_navigation: bool,
    pub pull_to_refresh: bool,
    pub allow_zoom: bool,
    pub keep_awake: bool,
    pub open_external_links_in_browser: bool,
    pub primary_color: String,
    /// "light" | "dark" | "system"
    pub theme_mode: String,
    /// "auto" | "portrait" | "landscape"
    pub orientation: String,
    pub splash_enabled: bool,
    pub splash_background: String,
    pub splash_text: Option<String>,
    pub splash_duration_ms: i64,
    pub privacy_policy_url: Option<String>,
    pub terms_url: Option<String>,
    pub user_agent_suffix: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            show_navigation: true,
            pull_to_refresh: true,
            allow_zoom: false,
            keep_awake: false,
            open_external_links_in_browser: true,
            primary_color: "#000000".into(),
            theme_mode: "system".into(),
            orientation: "auto".into(),
            splash_enabled: true,
            splash_background: "#ffffff".into(),
            splash_text: None,
            splash_duration_ms: 1500,
            privacy_policy_url: None,
            terms_url: None,
            user_agent_suffix: None,
        }
    }
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct App {
    pub id: Uuid,
    pub name: String,
    pub website_url: String,
    pub package_name: String,
    pub icon_url: Option<String>,
    #[schema(value_type = Object)]
    pub config: serde_json::Value,
    pub notification_email: Option<String>,
    pub owner_id: Option<String>,
    pub android_app_status: Option<String>,
    pub android_source_status: Option<String>,
    pub ios_app_status: Option<String>,
    pub ios_source_status: Option<String>,
    pub build_progress: i32,
    pub build_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl App {
    pub fn parsed_config(&self) -> AppConfig {
        serde_json::from_value(self.config.clone()).unwrap_or_default()
    }
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct AppBuild {
    pub id: Uuid,
    pub app_id: Uuid,
    pub build_type: String,
    pub status: String,
    pub progress: i32,
    pub download_url: Option<String>,
    pub build_message: Option<String>,
    pub ci_run_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct AppSigning {
    pub app_id: Uuid,
    pub keystore_sealed: Option<String>,
    pub key_alias: Option<String>,
    pub key_password_sealed: Option<String>,
    pub store_password_sealed: Option<String>,
    pub team_id: Option<String>,
    pub fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
