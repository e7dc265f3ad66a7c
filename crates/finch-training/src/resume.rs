use crate::error::{TrainingError, TrainingResult};
use crate::schedule::{StageSchedule, TrainingPosition};

/// Where to restart a run, computed once at startup before any collective
/// operation begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePlan {
    pub position: TrainingPosition,
    /// True when the resume epoch falls strictly inside a stage, so the
    /// stage's optimizer must be reloaded from the checkpoint. On a stage
    /// boundary the new stage starts with a freshly constructed optimizer
    /// scoped to its trainable set instead.
    pub needs_optimizer_restore: bool,
    /// Ordinals of stages fully completed before the resume point. Their
    /// freeze transitions must still be replayed, in order, to land on the
    /// correct cumulative trainable set; no training steps re-execute.
    pub completed_stages: Vec<usize>,
}

/// Maps a requested resume epoch onto the stage schedule.
#[derive(Debug, Clone, Copy)]
pub struct ResumePlanner<'a> {
    schedule: &'a StageSchedule,
}

impl<'a> ResumePlanner<'a> {
    #[must_use]
    pub fn new(schedule: &'a StageSchedule) -> Self {
        Self { schedule }
    }

    /// Compute the starting position for a requested resume epoch, or the
    /// very beginning when `resume` is `None`.
    ///
    /// Walks the schedule accumulating epoch counts: the first stage whose
    /// range contains the epoch is the active stage. An epoch equal to the
    /// cumulative count of a completed stage is a boundary: the stage it
    /// begins starts fresh. An epoch at or past the total is
    /// `ScheduleExhausted`.
    pub fn plan(&self, resume: Option<u64>, steps_per_epoch: u64) -> TrainingResult<ResumePlan> {
        let requested = resume.unwrap_or(0);
        let total = self.schedule.total_epochs();

        let position = self.schedule.position_of(requested, steps_per_epoch).ok_or(
            TrainingError::ScheduleExhausted { requested, total },
        )?;

        let stage_start = self.schedule.stage_start_epoch(position.stage_ordinal);
        let needs_optimizer_restore = resume.is_some() && requested > stage_start;

        Ok(ResumePlan {
            position,
            needs_optimizer_restore,
            completed_stages: (0..position.stage_ordinal).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::FreezePolicy;

    fn two_stage() -> StageSchedule {
        StageSchedule::new(vec![
            (2, FreezePolicy::ClassifierOnly),
            (3, FreezePolicy::UnfreezeAll),
        ])
        .unwrap()
    }

    #[test]
    fn test_fresh_run_starts_at_stage_zero() {
        let schedule = two_stage();
        let plan = ResumePlanner::new(&schedule).plan(None, 10).unwrap();
        assert_eq!(plan.position.stage_ordinal, 0);
        assert_eq!(plan.position.epoch_within_stage, 0);
        assert!(!plan.needs_optimizer_restore);
        assert!(plan.completed_stages.is_empty());
    }

    #[test]
    fn test_resume_inside_stage_restores_optimizer() {
        let schedule = two_stage();
        let plan = ResumePlanner::new(&schedule).plan(Some(3), 10).unwrap();
        assert_eq!(plan.position.stage_ordinal, 1);
        assert_eq!(plan.position.epoch_within_stage, 1);
        assert!(plan.needs_optimizer_restore);
        assert_eq!(plan.completed_stages, vec![0]);
    }

    #[test]
    fn test_resume_on_boundary_starts_stage_fresh() {
        let schedule = two_stage();
        let plan = ResumePlanner::new(&schedule).plan(Some(2), 10).unwrap();
        assert_eq!(plan.position.stage_ordinal, 1);
        assert_eq!(plan.position.epoch_within_stage, 0);
        assert!(!plan.needs_optimizer_restore);
        assert_eq!(plan.completed_stages, vec![0]);
    }

    #[test]
    fn test_resume_past_schedule_is_exhausted() {
        let schedule = two_stage();
        let err = ResumePlanner::new(&schedule).plan(Some(5), 10).unwrap_err();
        assert!(matches!(err, TrainingError::ScheduleExhausted { requested: 5, total: 5 }));
    }

    /// Replaying the schedule epoch by epoch must agree with the direct
    /// computation for every resume point.
    #[test]
    fn test_fast_plan_matches_full_replay() {
        let schedule = StageSchedule::from_epoch_counts(&[3, 2, 4, 6]).unwrap();
        let planner = ResumePlanner::new(&schedule);
        for resume in 0..schedule.total_epochs() {
            let mut stage_ordinal = 0usize;
            let mut epoch_within_stage = 0u64;
            for _epoch in 0..resume {
                epoch_within_stage += 1;
                if epoch_within_stage == schedule.stage(stage_ordinal).unwrap().epoch_count {
                    stage_ordinal += 1;
                    epoch_within_stage = 0;
                }
            }
            let plan = planner.plan(Some(resume), 1).unwrap();
            assert_eq!(plan.position.stage_ordinal, stage_ordinal, "resume {resume}");
            assert_eq!(plan.position.epoch_within_stage, epoch_within_stage, "resume {resume}");
        }
    }

    #[test]
    fn test_boundary_resume_never_restores_optimizer() {
        let schedule = StageSchedule::from_epoch_counts(&[3, 2, 4, 6]).unwrap();
        let planner = ResumePlanner::new(&schedule);
        let mut boundary = 0u64;
        for stage in schedule.stages() {
            let plan = planner.plan(Some(boundary), 1).unwrap();
            assert!(!plan.needs_optimizer_restore, "boundary {boundary}");
            assert_eq!(plan.position.stage_ordinal, stage.ordinal);
            boundary += stage.epoch_count;
        }
    }
}
