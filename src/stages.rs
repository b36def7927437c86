use serde::Deserialize;
use tokio::time::Duration;

/// One segment of the concurrency ramp.
///
/// During the stage the number of virtual users moves from the previous
/// stage's target (or the plan's start target) to `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

/// How the target moves within a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// Linear ramp from the previous target to the stage target.
    #[default]
    Linear,

    /// Jump to the stage target at the start of the stage and hold it.
    Step,
}

/// Ordered, immutable list of stages describing the concurrency curve.
///
/// `target_at` is a pure function of elapsed time, so the scheduler can
/// re-evaluate it on every tick without keeping countdown state.
#[derive(Debug, Clone, PartialEq)]
pub struct StagePlan {
    start_target: usize,
    stages: Vec<Stage>,
    interpolation: Interpolation,
}

impl StagePlan {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            start_target: 0,
            stages,
            interpolation: Interpolation::Linear,
        }
    }

    pub fn with_start_target(mut self, start_target: usize) -> Self {
        self.start_target = start_target;
        self
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn start_target(&self) -> usize {
        self.start_target
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    /// Sum of all stage durations, saturating at `Duration::MAX`.
    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |total, s| total.saturating_add(s.duration))
    }

    /// Highest concurrency the plan ever asks for.
    pub fn max_target(&self) -> usize {
        self.stages
            .iter()
            .map(|s| s.target)
            .fold(self.start_target, usize::max)
    }

    /// Calculates the target number of virtual users at `elapsed`.
    ///
    /// At a stage boundary the value reached by the stage that just ended is
    /// returned. Once the final stage has elapsed the target is zero.
    pub fn target_at(&self, elapsed: Duration) -> usize {
        if self.stages.is_empty() || elapsed >= self.total_duration() {
            return 0;
        }

        let mut stage_start = Duration::ZERO;
        let mut from = self.start_target;

        for stage in &self.stages {
            let stage_end = stage_start.saturating_add(stage.duration);

            if elapsed < stage_end || (elapsed == stage_end && !stage.duration.is_zero()) {
                let into_stage = elapsed - stage_start;
                return match self.interpolation {
                    Interpolation::Step => stage.target,
                    Interpolation::Linear => Self::linear_interpolate(
                        from,
                        stage.target,
                        into_stage,
                        stage.duration,
                    ),
                };
            }

            stage_start = stage_end;
            from = stage.target;
        }

        0
    }

    fn linear_interpolate(from: usize, to: usize, elapsed: Duration, duration: Duration) -> usize {
        if duration.is_zero() {
            return to;
        }
        let fraction = (elapsed.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0);
        let value = from as f64 + (to as f64 - from as f64) * fraction;
        value.round().max(0.0) as usize
    }
}
