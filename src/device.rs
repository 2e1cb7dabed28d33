use crate::auth::AuthClient;
use crate::connection::SocketSession;
use crate::error::{Result, WebackError};
use crate::map::{MapDocument, VirtualPoint};
use crate::protocol::OutboundEnvelope;
use crate::scheduler::{RefreshScheduler, ACTIVE_REFRESH_INTERVAL};
use crate::status::StatusStore;
use crate::subscription::UpdateReceiver;
use crate::types::{DeviceDescriptor, FanSpeed, LinkState, MopLevel, RobotStatus, Switch, WorkingState};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Status polls sent after every command
pub const CONFIRM_POLLS: u32 = 4;
const CONFIRM_POLL_SPACING: Duration = Duration::from_millis(600);

const MAX_VOLUME: u8 = 100;

/// A robot vacuum reachable through the WeBack cloud
///
/// Commands carry no acknowledgement. After publishing one the robot is
/// polled a few times and the answer shows up as a status update.
pub struct VacuumDevice {
    thing_name: String,
    nickname: String,
    sub_type: String,
    auth: Arc<AuthClient>,
    status: Arc<StatusStore>,
    session: Arc<SocketSession>,
}

impl VacuumDevice {
    /// Create a device from its listing, seeding the status with the
    /// snapshot the listing carried
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(descriptor: DeviceDescriptor, auth: Arc<AuthClient>, close_when_idle: bool) -> Self {
        let DeviceDescriptor {
            thing_name,
            thing_nickname,
            sub_type,
            thing_status,
        } = descriptor;

        let status = Arc::new(StatusStore::new(Some(thing_status)));
        let session = Arc::new(SocketSession::new(auth.clone(), status.clone(), close_when_idle));

        Self {
            thing_name,
            nickname: thing_nickname,
            sub_type,
            auth,
            status,
            session,
        }
    }

    pub fn thing_name(&self) -> &str {
        &self.thing_name
    }

    /// User-assigned name
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn sub_type(&self) -> &str {
        &self.sub_type
    }

    pub fn session(&self) -> &Arc<SocketSession> {
        &self.session
    }

    pub fn link_state(&self) -> LinkState {
        self.session.link_state()
    }

    /// Last known status
    pub fn status(&self) -> Option<RobotStatus> {
        self.status.current()
    }

    pub fn map(&self) -> Option<MapDocument> {
        self.session.map()
    }

    /// Subscribe to status and map changes
    pub fn subscribe(&self) -> UpdateReceiver {
        self.status.subscribe()
    }

    pub async fn connect(&self) -> Result<()> {
        self.session.connect().await
    }

    /// Start the background refresh loop for this robot
    pub fn start_refresh(&self) -> RefreshScheduler {
        RefreshScheduler::spawn(
            self.session.clone(),
            OutboundEnvelope::KeepAliveSync {
                thing_name: self.thing_name.clone(),
                sub_type: self.sub_type.clone(),
            },
        )
    }

    /// Ask the robot to push its status
    ///
    /// The reply arrives later as a status update.
    pub async fn poll_status(&self) -> Result<()> {
        self.session
            .publish(&OutboundEnvelope::StatusPoll {
                thing_name: self.thing_name.clone(),
                sub_type: self.sub_type.clone(),
            })
            .await
    }

    /// Send raw desired-state fields to the robot
    ///
    /// Switches the refresh loop to the fast interval and polls the status a
    /// few times whether or not the command went through. Returns the
    /// outcome of the command itself.
    pub async fn send_command(&self, state: Map<String, Value>) -> Result<()> {
        self.session.set_refresh_interval(ACTIVE_REFRESH_INTERVAL);

        let envelope = OutboundEnvelope::DeviceCommand {
            thing_name: self.thing_name.clone(),
            sub_type: self.sub_type.clone(),
            state,
        };
        let outcome = self.session.publish(&envelope).await;
        if let Err(e) = &outcome {
            tracing::warn!("Command to {} failed: {}", self.thing_name, e);
        }

        for _ in 0..CONFIRM_POLLS {
            tokio::time::sleep(CONFIRM_POLL_SPACING).await;
            if let Err(e) = self.poll_status().await {
                tracing::debug!("Confirmation poll failed: {}", e);
            }
        }

        outcome
    }

    async fn set_working_state(&self, state: WorkingState) -> Result<()> {
        self.send_command(fields([("working_status", Value::from(state.as_str()))]))
            .await
    }

    /// Start a full clean
    pub async fn start(&self) -> Result<()> {
        self.set_working_state(WorkingState::AutoClean).await
    }

    /// Stop cleaning and head back to the dock
    pub async fn stop(&self) -> Result<()> {
        self.return_to_base().await
    }

    pub async fn return_to_base(&self) -> Result<()> {
        self.set_working_state(WorkingState::BackCharging).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.set_working_state(WorkingState::Standby).await
    }

    pub async fn clean_spot(&self) -> Result<()> {
        self.set_working_state(WorkingState::SpotClean).await
    }

    /// Make the robot play its locator sound
    pub async fn locate(&self) -> Result<()> {
        self.set_working_state(WorkingState::LocationAlarm).await
    }

    /// Drive to a point, in virtual coordinates
    pub async fn goto(&self, point: VirtualPoint) -> Result<()> {
        self.send_command(fields([
            ("working_status", Value::from(WorkingState::PlanningLocation.as_str())),
            (
                "goto_point",
                Value::from(format!("{},{}", point.x.round() as i64, point.y.round() as i64)),
            ),
        ]))
        .await
    }

    /// Clean the area enclosed by `corners`, in virtual coordinates
    pub async fn clean_rect(&self, corners: &[VirtualPoint]) -> Result<()> {
        if corners.is_empty() {
            return Err(WebackError::Validation("rectangle clean needs at least one point".into()));
        }
        let xs: Vec<i64> = corners.iter().map(|p| p.x.round() as i64).collect();
        let ys: Vec<i64> = corners.iter().map(|p| p.y.round() as i64).collect();
        self.send_command(fields([
            ("working_status", Value::from(WorkingState::PlanningRect.as_str())),
            ("planning_rect_point_num", Value::from(corners.len())),
            ("planning_rect_x", json!(xs)),
            ("planning_rect_y", json!(ys)),
        ]))
        .await
    }

    /// Set a fan speed or mop level while cleaning
    ///
    /// Rejected without contacting the robot unless it is cleaning and
    /// `value` is a known [`FanSpeed`] or [`MopLevel`].
    pub async fn set_fan_water_speed(&self, value: &str) -> Result<()> {
        let cleaning = self
            .status
            .current()
            .is_some_and(|status| status.is_cleaning());
        if !cleaning {
            return Err(WebackError::Validation(format!(
                "cannot set speed {value:?}, the robot is not cleaning"
            )));
        }

        let key = if FanSpeed::parse(value).is_some() {
            "fan_status"
        } else if MopLevel::parse(value).is_some() {
            "water_level"
        } else {
            return Err(WebackError::Validation(format!("unknown fan or mop speed {value:?}")));
        };

        self.send_command(fields([(key, Value::from(value))])).await
    }

    pub async fn set_fan_speed(&self, speed: FanSpeed) -> Result<()> {
        self.set_fan_water_speed(speed.as_str()).await
    }

    pub async fn set_mop_level(&self, level: MopLevel) -> Result<()> {
        self.set_fan_water_speed(level.as_str()).await
    }

    pub async fn set_voice(&self, switch: Switch) -> Result<()> {
        self.send_command(fields([("voice_switch", Value::from(switch.as_str()))]))
            .await
    }

    /// Do-not-disturb mode
    pub async fn set_undisturb(&self, switch: Switch) -> Result<()> {
        self.send_command(fields([("undisturb_mode", Value::from(switch.as_str()))]))
            .await
    }

    /// Speaker volume in percent
    pub async fn set_volume(&self, volume: u8) -> Result<()> {
        if volume > MAX_VOLUME {
            return Err(WebackError::Validation(format!(
                "volume {volume} is out of range 0..={MAX_VOLUME}"
            )));
        }
        self.send_command(fields([("volume", Value::from(volume))])).await
    }

    /// Fetch the map the robot currently uses and install it
    pub async fn load_map(&self) -> Result<()> {
        let map_id = self
            .status
            .current()
            .and_then(|status| status.active_map_id())
            .ok_or_else(|| WebackError::Validation("robot reports no active map".into()))?;

        let payload = self
            .auth
            .fetch_reuse_map(&map_id, &self.sub_type, &self.thing_name)
            .await?;
        self.session.install_map(&payload)
    }
}

fn fields<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}
