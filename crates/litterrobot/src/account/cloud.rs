//! Litter-Robot cloud API client.
//!
//! Login is an OAuth password grant against the auth endpoint. Robots are
//! listed under `/users/{user_id}/robots`; commands are posted to
//! `/users/{user_id}/robots/{robot_id}/dispatch-commands`.

use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::NaiveTime;
use chrono::TimeDelta;
use chrono::Utc;
use reqwest::Method;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use tracing::info;

use super::Account;
use super::AccountError;
use super::PowerStatus;
use super::Robot;
use super::RobotData;
use super::UnitStatus;
use crate::config::CloudConfig;
use crate::time::ZonedTime;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a robot stays in sleep mode once it starts sleeping.
const SLEEP_DURATION_HOURS: i64 = 8;

const COMMAND_CLEAN: &str = "<C";
const COMMAND_POWER_ON: &str = "<P1";
const COMMAND_POWER_OFF: &str = "<P0";
const COMMAND_NIGHT_LIGHT_ON: &str = "<N1";
const COMMAND_NIGHT_LIGHT_OFF: &str = "<N0";
const COMMAND_LOCK_ON: &str = "<L1";
const COMMAND_LOCK_OFF: &str = "<L0";
const COMMAND_SLEEP_MODE_ON: &str = "<S1";
const COMMAND_SLEEP_MODE_OFF: &str = "<S0";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Clone)]
struct Session {
    access_token: String,
    user_id: String,
}

/// HTTP plumbing shared by the account and its robots.
struct Transport {
    http: reqwest::Client,
    config: CloudConfig,
    session: RwLock<Option<Session>>,
    /// Username and password of the last successful login
    credentials: RwLock<Option<(String, String)>>,
}

impl Transport {
    fn session(&self) -> Result<Session, AccountError> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(AccountError::NotConnected)
    }

    async fn login(&self, username: &str, password: &str) -> Result<(), AccountError> {
        let mut form = vec![
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
        ];
        if let Some(client_id) = &self.config.client_id {
            form.push(("client_id", client_id.as_str()));
        }
        if let Some(client_secret) = &self.config.client_secret {
            form.push(("client_secret", client_secret.as_str()));
        }

        let resp = self
            .http
            .post(&self.config.auth_url)
            .form(&form)
            .send()
            .await
            .map_err(transport_error)?;

        match resp.status() {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = resp.text().await.unwrap_or_default();
                return Err(AccountError::Login(body));
            }
            s if !s.is_success() => {
                let body = resp.text().await.unwrap_or_default();
                return Err(AccountError::Api {
                    status: s.as_u16(),
                    message: body,
                });
            }
            _ => {}
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AccountError::Decode(e.to_string()))?;

        // The user id is needed to build every robot URL
        let user = self
            .request(Method::GET, "/users", &token.access_token, None)
            .await?;
        let user_id = user
            .pointer("/user/userId")
            .and_then(value_as_string)
            .ok_or_else(|| AccountError::Decode("missing user.userId".to_string()))?;

        debug!("Logged in to Litter-Robot API as user {}", user_id);

        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(Session {
            access_token: token.access_token,
            user_id,
        });
        *self.credentials.write().unwrap_or_else(PoisonError::into_inner) =
            Some((username.to_string(), password.to_string()));
        Ok(())
    }

    /// Log in again with the stored credentials after the token expired.
    async fn relogin(&self) -> Result<(), AccountError> {
        let (username, password) = self
            .credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(AccountError::NotConnected)?;
        info!("Litter-Robot session expired, logging in again");
        self.login(&username, &password).await
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        access_token: &str,
        body: Option<Value>,
    ) -> Result<Value, AccountError> {
        let url = format!("{}{}", self.config.api_url.trim_end_matches('/'), path);
        let mut req = self.http.request(method, &url).bearer_auth(access_token);
        if let Some(api_key) = &self.config.api_key {
            req = req.header("x-api-key", api_key);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req.send().await.map_err(transport_error)?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(AccountError::SessionExpired);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(AccountError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let text = resp.text().await.map_err(transport_error)?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| AccountError::Decode(e.to_string()))
    }

    async fn user_request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, AccountError> {
        let session = self.session()?;
        let url = format!("/users/{}{}", session.user_id, path);
        match self
            .request(method.clone(), &url, &session.access_token, body.clone())
            .await
        {
            Err(AccountError::SessionExpired) => {
                // One fresh login, then the request is retried once
                self.relogin().await?;
                let session = self.session()?;
                let url = format!("/users/{}{}", session.user_id, path);
                self.request(method, &url, &session.access_token, body).await
            }
            result => result,
        }
    }
}

fn transport_error(e: reqwest::Error) -> AccountError {
    if e.is_decode() {
        AccountError::Decode(e.to_string())
    } else {
        AccountError::Connection(e.to_string())
    }
}

/// Read a field that the API sends either as a JSON string or a JSON number.
fn value_as_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn field_u32(record: &Value, key: &str) -> u32 {
    record
        .get(key)
        .and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as u64),
            _ => None,
        })
        .map(|n| n.min(u32::MAX as u64) as u32)
        .unwrap_or_default()
}

fn field_flag(record: &Value, key: &str) -> bool {
    match record.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "1" || s.eq_ignore_ascii_case("true"),
        Some(Value::Number(n)) => n.as_u64() == Some(1),
        _ => false,
    }
}

/// Parse `sleepModeActive`, which is "0" when off and "1HH:MM:SS" when on,
/// the time being how long ago the current sleep window started.
fn parse_sleep_mode(
    raw: &str,
    last_seen: DateTime<Utc>,
) -> (bool, Option<DateTime<Utc>>, bool) {
    let Some(elapsed) = raw.strip_prefix('1') else {
        return (false, None, false);
    };

    let mut parts = elapsed.split(':').map(|p| p.parse::<i64>().ok());
    let (Some(Some(h)), Some(Some(m)), Some(Some(s))) = (parts.next(), parts.next(), parts.next())
    else {
        return (true, None, false);
    };

    let since_start = TimeDelta::try_hours(h)
        .zip(TimeDelta::try_minutes(m))
        .zip(TimeDelta::try_seconds(s))
        .and_then(|((h, m), s)| h.checked_add(&m)?.checked_add(&s));
    let Some(since_start) = since_start else {
        return (true, None, false);
    };
    let Some(start) = last_seen.checked_sub_signed(since_start) else {
        return (true, None, false);
    };
    let sleep_window = TimeDelta::hours(SLEEP_DURATION_HOURS);
    (true, Some(start), since_start < sleep_window)
}

/// Convert one robot record from the API into a [`RobotData`].
fn parse_robot(record: &Value) -> Result<RobotData, AccountError> {
    let id = record
        .get("litterRobotId")
        .and_then(value_as_string)
        .ok_or_else(|| AccountError::Decode("robot without litterRobotId".to_string()))?;
    let serial = record
        .get("litterRobotSerial")
        .and_then(value_as_string)
        .unwrap_or_default();
    let name = record
        .get("litterRobotNickname")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or(serial.as_str())
        .to_string();

    let last_seen = record
        .get("lastSeen")
        .and_then(|v| v.as_str())
        .and_then(|s| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
                .or_else(|| {
                    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                        .ok()
                        .map(|ndt| ndt.and_utc())
                })
        })
        .unwrap_or_else(Utc::now);

    let (sleep_mode_active, sleep_mode_start_time, is_sleeping) = record
        .get("sleepModeActive")
        .and_then(value_as_string)
        .map(|raw| parse_sleep_mode(&raw, last_seen))
        .unwrap_or((false, None, false));

    // cleanCycleWaitTimeMinutes is a hex string ("7", "F")
    let clean_cycle_wait_time_minutes = record
        .get("cleanCycleWaitTimeMinutes")
        .and_then(|v| v.as_str())
        .and_then(|s| u32::from_str_radix(s, 16).ok())
        .unwrap_or(7);

    Ok(RobotData {
        id,
        serial,
        name,
        unit_status: record
            .get("unitStatus")
            .and_then(|v| v.as_str())
            .map(UnitStatus::from_code)
            .unwrap_or_default(),
        power_status: record
            .get("powerStatus")
            .and_then(|v| v.as_str())
            .map(PowerStatus::from_code)
            .unwrap_or_default(),
        waste_drawer_gauge: field_u32(record, "DFILevelPercent").min(100) as u8,
        cycle_count: field_u32(record, "cycleCount"),
        cycle_capacity: field_u32(record, "cycleCapacity"),
        cycles_after_drawer_full: field_u32(record, "cyclesAfterDrawerFull"),
        night_light_active: field_flag(record, "nightLightActive"),
        panel_lock_active: field_flag(record, "panelLockActive"),
        sleep_mode_active,
        sleep_mode_start_time,
        is_sleeping,
        clean_cycle_wait_time_minutes,
    })
}

/// A robot reached through the cloud API.
pub struct CloudRobot {
    transport: Arc<Transport>,
    data: RwLock<RobotData>,
}

impl CloudRobot {
    fn set_data(&self, data: RobotData) {
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = data;
    }

    async fn dispatch(&self, command: String) -> Result<(), AccountError> {
        let id = self.data().id;
        debug!("Dispatching {} to robot {}", command, id);
        self.transport
            .user_request(
                Method::POST,
                &format!("/robots/{}/dispatch-commands", id),
                Some(serde_json::json!({
                    "command": command,
                    "litterRobotId": id,
                })),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Robot for CloudRobot {
    fn data(&self) -> RobotData {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn set_power_status(&self, on: bool) -> Result<(), AccountError> {
        let cmd = if on { COMMAND_POWER_ON } else { COMMAND_POWER_OFF };
        self.dispatch(cmd.to_string()).await
    }

    async fn start_cleaning(&self) -> Result<(), AccountError> {
        self.dispatch(COMMAND_CLEAN.to_string()).await
    }

    async fn set_night_light(&self, on: bool) -> Result<(), AccountError> {
        let cmd = if on {
            COMMAND_NIGHT_LIGHT_ON
        } else {
            COMMAND_NIGHT_LIGHT_OFF
        };
        self.dispatch(cmd.to_string()).await
    }

    async fn set_panel_lockout(&self, on: bool) -> Result<(), AccountError> {
        let cmd = if on { COMMAND_LOCK_ON } else { COMMAND_LOCK_OFF };
        self.dispatch(cmd.to_string()).await
    }

    async fn set_sleep_mode(
        &self,
        enabled: bool,
        sleep_time: Option<ZonedTime>,
    ) -> Result<(), AccountError> {
        if !enabled {
            return self.dispatch(COMMAND_SLEEP_MODE_OFF.to_string()).await;
        }

        let start: NaiveTime = match sleep_time {
            Some(t) => t.to_utc_time().ok_or_else(|| {
                AccountError::InvalidCommand(format!("{} does not exist today", t))
            })?,
            None => self
                .data()
                .sleep_mode_start_time
                .unwrap_or_else(Utc::now)
                .time(),
        };

        self.dispatch(format!(
            "{}{}",
            COMMAND_SLEEP_MODE_ON,
            start.format("%H:%M:%S")
        ))
        .await
    }

    async fn reset_waste_drawer(&self) -> Result<(), AccountError> {
        let data = self.data();
        let updated = self
            .transport
            .user_request(
                Method::PATCH,
                &format!("/robots/{}", data.id),
                Some(serde_json::json!({
                    "cycleCount": 0,
                    "cycleCapacity": data.cycle_capacity,
                    "cyclesAfterDrawerFull": 0,
                })),
            )
            .await?;

        self.set_data(parse_robot(&updated)?);
        Ok(())
    }
}

/// Account backed by the Litter-Robot cloud API.
pub struct CloudAccount {
    transport: Arc<Transport>,
    robots: RwLock<Vec<Arc<CloudRobot>>>,
}

impl CloudAccount {
    pub fn new(config: &CloudConfig) -> Result<Self, AccountError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AccountError::Connection(e.to_string()))?;

        Ok(Self {
            transport: Arc::new(Transport {
                http,
                config: config.clone(),
                session: RwLock::new(None),
                credentials: RwLock::new(None),
            }),
            robots: RwLock::new(Vec::new()),
        })
    }

    /// Merge freshly fetched records into the existing robot handles.
    fn apply_records(&self, records: Vec<RobotData>) {
        let mut robots = self.robots.write().unwrap_or_else(PoisonError::into_inner);
        for data in records {
            match robots.iter().find(|r| r.data().id == data.id) {
                Some(robot) => robot.set_data(data),
                None => {
                    info!("Found Litter-Robot {} ({})", data.name, data.serial);
                    robots.push(Arc::new(CloudRobot {
                        transport: self.transport.clone(),
                        data: RwLock::new(data),
                    }));
                }
            }
        }
    }
}

#[async_trait]
impl Account for CloudAccount {
    async fn connect(
        &self,
        username: &str,
        password: &str,
        load_robots: bool,
    ) -> Result<(), AccountError> {
        self.transport.login(username, password).await?;
        if load_robots {
            self.refresh_robots().await?;
        }
        Ok(())
    }

    async fn refresh_robots(&self) -> Result<(), AccountError> {
        let body = self
            .transport
            .user_request(Method::GET, "/robots", None)
            .await?;
        let records = body
            .as_array()
            .ok_or_else(|| AccountError::Decode("expected a list of robots".to_string()))?
            .iter()
            .map(parse_robot)
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Refreshed {} robot(s)", records.len());
        self.apply_records(records);
        Ok(())
    }

    fn robots(&self) -> Vec<Arc<dyn Robot>> {
        self.robots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.clone() as Arc<dyn Robot>)
            .collect()
    }
}
