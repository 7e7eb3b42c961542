//! Rotation actuator facade.
//!
//! Groups the controller calls into the sequences the sweep needs and applies
//! the configured timeouts and settle times. Errors from the controller,
//! timeouts included, are passed through unchanged.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info};

use crate::angle::Angle;
use crate::config::ActuatorConfig;
use crate::error::AppResult;
use crate::hardware::{DeviceInfo, RotationStage};

/// One connected rotation controller plus its settings.
pub struct Actuator {
    stage: Box<dyn RotationStage>,
    config: ActuatorConfig,
}

impl Actuator {
    /// Wrap a freshly created controller handle.
    pub fn new(stage: Box<dyn RotationStage>, config: ActuatorConfig) -> Self {
        Self { stage, config }
    }

    /// Connect, wait for the controller settings and load the motor configuration.
    pub async fn initialize(&mut self) -> AppResult<()> {
        self.stage.connect().await?;
        self.stage
            .wait_for_settings_initialized(self.config.settings_timeout)
            .await?;
        self.stage.load_configuration().await?;
        debug!(serial = %self.stage.device_info().serial, "Controller initialized");
        Ok(())
    }

    /// Start status polling and energise the motor.
    pub async fn enable(&mut self) -> AppResult<()> {
        self.stage.start_polling(self.config.polling_interval).await?;
        sleep(self.config.enable_settle).await;
        self.stage.enable().await?;
        sleep(self.config.enable_settle).await;
        Ok(())
    }

    /// Apply rotation mode and velocity parameters.
    pub async fn configure(&mut self) -> AppResult<()> {
        self.stage
            .set_rotation_mode(self.config.rotation_mode, self.config.rotation_direction)
            .await?;
        self.stage
            .set_velocity(self.config.max_velocity, self.config.acceleration)
            .await
    }

    /// Log the controller identification and return it.
    pub fn show_info(&self) -> DeviceInfo {
        let info = self.stage.device_info();
        info!("Device {} = {}", info.serial, info.name);
        info
    }

    /// Home and settle.
    pub async fn home(&mut self) -> AppResult<()> {
        info!("Actuator is Homing");
        self.stage.home(self.config.home_timeout).await?;
        sleep(self.config.home_settle).await;
        Ok(())
    }

    /// Move to `angle` within the sweep move timeout and settle.
    pub async fn move_to(&mut self, angle: Angle) -> AppResult<()> {
        self.move_within(angle, self.config.move_timeout).await
    }

    /// Move to `angle` within `timeout` and settle.
    pub async fn move_within(&mut self, angle: Angle, timeout: Duration) -> AppResult<()> {
        info!("Actuator is Moving to {} deg", angle);
        self.stage.move_to(angle, timeout).await?;
        sleep(self.config.move_settle).await;
        Ok(())
    }

    /// Current position.
    pub async fn position(&mut self) -> AppResult<Angle> {
        self.stage.position().await
    }

    /// Stop polling, disable and disconnect.
    pub async fn shutdown(&mut self) -> AppResult<()> {
        self.stage.stop_polling().await?;
        self.stage.disable().await?;
        self.stage.disconnect().await?;
        info!("Actuator disconnected");
        Ok(())
    }
}

/// Zero every settle time, for tests and dry runs.
pub fn without_settling(mut config: ActuatorConfig) -> ActuatorConfig {
    config.enable_settle = Duration::ZERO;
    config.home_settle = Duration::ZERO;
    config.move_settle = Duration::ZERO;
    config
}
