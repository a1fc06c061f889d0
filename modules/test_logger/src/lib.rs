// Demo module: drives a slow jaw animation and logs through the host.

use anyhow::{bail, Result};
use api::{Capabilities, ModuleContext, TrackingModule, UnifiedExpressions};
use std::thread;
use std::time::{Duration, Instant};

const FRAME_TIME: Duration = Duration::from_millis(10);

pub struct TestLogger {
    frame_count: u64,
    started: Instant,
    context: Option<ModuleContext>,
}

impl TestLogger {
    fn new() -> Self {
        Self {
            frame_count: 0,
            started: Instant::now(),
            context: None,
        }
    }
}

impl TrackingModule for TestLogger {
    fn supported(&self) -> Capabilities {
        Capabilities::EXPRESSION
    }

    fn initialize(
        &mut self,
        context: ModuleContext,
        _eye_available: bool,
        expression_available: bool,
    ) -> Result<Capabilities> {
        let logger = &context.logger;
        if !expression_available {
            logger.info("Expression tracking already claimed, standing by");
            return Ok(Capabilities::NONE);
        }

        logger.info("Initializing test logger plugin");
        logger.debug("Debug: Plugin initialization details");
        logger.trace("Trace: Very detailed initialization info");
        self.started = Instant::now();
        self.context = Some(context);
        Ok(Capabilities::EXPRESSION)
    }

    fn update(&mut self) -> Result<()> {
        let Some(context) = &self.context else {
            bail!("update called before initialize");
        };
        self.frame_count += 1;

        let phase = self.started.elapsed().as_secs_f32();
        let jaw = (phase.sin() + 1.0) * 0.5;
        context
            .tracking
            .write(|data| data.set_shape(UnifiedExpressions::JawOpen, jaw));

        let logger = &context.logger;
        match self.frame_count {
            1 => {
                logger.info("Update called - frame 1");
                context.activity.set_active(true);
            }
            10 => logger.info("Frame 10 reached. Plugin will now run silently."),
            1000 | 100_000 => logger.info(&format!("Frame {} milestone", self.frame_count)),
            _ => logger.trace(&format!("Frame {} jaw {:.2}", self.frame_count, jaw)),
        }

        thread::sleep(FRAME_TIME);
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(context) = self.context.take() {
            context.activity.set_active(false);
            context.logger.info(&format!(
                "Tearing down test logger plugin. Total frames processed: {}",
                self.frame_count
            ));
        }
    }
}

api::export_module!(TestLogger::new());
