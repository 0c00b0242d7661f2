//! # thawgun-fixture
//!
//! Wires a [`Runtime`], a [`FakeWallClock`] and a [`ThawGun`] together for a
//! test body and tears the controller down exactly once afterwards.
//!
//! ```no_run
//! use std::time::Duration;
//! use thawgun_fixture::{Fixture, TimeDelta};
//!
//! let fixture = Fixture::new().unwrap();
//! let woke = fixture
//!     .run(|gun, rt| async move {
//!         let sleeper = rt.spawn({
//!             let rt = rt.clone();
//!             async move { rt.sleep(Duration::from_secs(3600)).await }
//!         });
//!         gun.advance(TimeDelta::hours(1)).await.unwrap();
//!         sleeper.is_finished()
//!     })
//!     .unwrap();
//! assert!(woke);
//! ```

use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use thawgun_config::{ConfigError, ThawConfig};
use thawgun_core::{
    FakeWallClock, MonotonicClock, SharedTimeSource, SystemWallClock, ThawError, ThawGun,
    WallClock,
};
use thawgun_runtime::{Runtime, RuntimeError};

pub use thawgun_core::chrono::TimeDelta;

/// The controller type every fixture hands out.
pub type Gun = ThawGun<Runtime, FakeWallClock>;

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("controller error: {0}")]
    Thaw(#[from] ThawError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// One runtime, one wall-clock freezer, one controller.
pub struct Fixture {
    runtime: Runtime,
    wall: Arc<FakeWallClock>,
    gun: Rc<Gun>,
}

impl Fixture {
    /// Fixture on real clocks with the default configuration.
    pub fn new() -> Result<Self, FixtureError> {
        Self::from_config(&ThawConfig::default())
    }

    /// Loads configuration from `config/thawgun.yaml` and `THAWGUN_*`.
    pub fn load() -> Result<Self, FixtureError> {
        Self::from_config(&ThawConfig::load()?)
    }

    /// Fixture on real clocks. Also installs the global log subscriber at
    /// the configured level, unless one is already installed.
    pub fn from_config(config: &ThawConfig) -> Result<Self, FixtureError> {
        thawgun_telemetry::init_logging(&config.telemetry.log_level);
        Self::with_clocks(
            config,
            Arc::new(MonotonicClock::new()),
            Arc::new(SystemWallClock),
        )
    }

    /// Fixture over explicit "real" clocks. The runtime and the wall-clock
    /// freezer share `real_mono`.
    pub fn with_clocks(
        config: &ThawConfig,
        real_mono: SharedTimeSource,
        real_wall: Arc<dyn WallClock>,
    ) -> Result<Self, FixtureError> {
        let runtime = Runtime::with_time_source(Arc::clone(&real_mono));
        let wall = Arc::new(FakeWallClock::new(real_wall, real_mono));
        let gun = ThawGun::with_config(runtime.clone(), Arc::clone(&wall), config)?;
        Ok(Self {
            runtime,
            wall,
            gun: Rc::new(gun),
        })
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn gun(&self) -> &Rc<Gun> {
        &self.gun
    }

    pub fn wall_clock(&self) -> &Arc<FakeWallClock> {
        &self.wall
    }

    /// Runs `body` as the root task, then tears the controller down if the
    /// body did not.
    ///
    /// Teardown happens even when the runtime fails. A teardown error only
    /// surfaces when the run itself succeeded.
    pub fn run<F, Fut, T>(&self, body: F) -> Result<T, FixtureError>
    where
        F: FnOnce(Rc<Gun>, Runtime) -> Fut,
        Fut: Future<Output = T> + 'static,
        T: 'static,
    {
        let root = body(Rc::clone(&self.gun), self.runtime.clone());
        let outcome = self.runtime.block_on(root);

        let teardown = if self.gun.is_torn_down() {
            Ok(())
        } else {
            self.gun.teardown()
        };
        debug!(
            items = self.runtime.executed_items(),
            audit = %self.runtime.audit_hash(),
            "fixture run finished"
        );

        let output = outcome?;
        teardown?;
        Ok(output)
    }
}

impl std::fmt::Debug for Fixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fixture")
            .field("runtime", &self.runtime)
            .field("gun", &self.gun)
            .finish()
    }
}
