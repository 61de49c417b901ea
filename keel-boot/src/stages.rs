//! Boot stage driver
//!
//! The boot is a fixed, statically built table of hooks in three phases:
//!
//! - **Prestart**: everything that must hold before memory is touched
//! - **Start**: the load pipeline, exactly once
//! - **Poststart**: commit, release secondaries, hand off
//!
//! [`drive`] checks the table is ordered by phase and then runs each hook
//! in turn; the first error stops the sequence.

use crate::error::BootError;

/// Boot phase, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Prestart,
    Start,
    Poststart,
}

/// A named hook over the boot context `C`.
pub struct Hook<C> {
    pub name: &'static str,
    pub run: fn(&mut C) -> Result<(), BootError>,
}

/// One entry of the stage table.
pub enum Stage<C> {
    Prestart(Hook<C>),
    Start(Hook<C>),
    Poststart(Hook<C>),
}

impl<C> Stage<C> {
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self {
            Self::Prestart(_) => Phase::Prestart,
            Self::Start(_) => Phase::Start,
            Self::Poststart(_) => Phase::Poststart,
        }
    }

    #[must_use]
    pub const fn hook(&self) -> &Hook<C> {
        match self {
            Self::Prestart(h) | Self::Start(h) | Self::Poststart(h) => h,
        }
    }
}

/// Reject tables whose phases go backwards or that hold more than one
/// start hook.
pub fn validate<C>(stages: &[Stage<C>]) -> Result<(), BootError> {
    let mut current = Phase::Prestart;
    let mut starts = 0;
    for stage in stages {
        let phase = stage.phase();
        if phase < current || (phase == Phase::Start && starts == 1) {
            return Err(BootError::StageSequence {
                stage: stage.hook().name,
            });
        }
        starts += usize::from(phase == Phase::Start);
        current = phase;
    }
    Ok(())
}

/// Run every stage in order.
///
/// Returns normally only if no hook diverged; on the real boot path the last
/// poststart hook transfers to the kernel.
pub fn drive<C>(stages: &[Stage<C>], ctx: &mut C) -> Result<(), BootError> {
    validate(stages)?;
    for stage in stages {
        let hook = stage.hook();
        log::debug!("{:?}: {}", stage.phase(), hook.name);
        (hook.run)(ctx).inspect_err(|e| {
            log::error!("Stage '{}' failed: {}", hook.name, e);
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Trace {
        ran: Vec<&'static str>,
    }

    fn first(t: &mut Trace) -> Result<(), BootError> {
        t.ran.push("first");
        Ok(())
    }

    fn second(t: &mut Trace) -> Result<(), BootError> {
        t.ran.push("second");
        Ok(())
    }

    fn third(t: &mut Trace) -> Result<(), BootError> {
        t.ran.push("third");
        Ok(())
    }

    fn failing(t: &mut Trace) -> Result<(), BootError> {
        t.ran.push("failing");
        Err(BootError::NotPrepared)
    }

    const fn hook(name: &'static str, run: fn(&mut Trace) -> Result<(), BootError>) -> Hook<Trace> {
        Hook { name, run }
    }

    #[test]
    fn test_runs_in_table_order() {
        let stages = [
            Stage::Prestart(hook("first", first)),
            Stage::Prestart(hook("second", second)),
            Stage::Start(hook("third", third)),
        ];
        let mut trace = Trace::default();
        assert_eq!(drive(&stages, &mut trace), Ok(()));
        assert_eq!(trace.ran, ["first", "second", "third"]);
    }

    #[test]
    fn test_error_stops_sequence() {
        let stages = [
            Stage::Prestart(hook("first", first)),
            Stage::Start(hook("failing", failing)),
            Stage::Poststart(hook("third", third)),
        ];
        let mut trace = Trace::default();
        assert_eq!(drive(&stages, &mut trace), Err(BootError::NotPrepared));
        assert_eq!(trace.ran, ["first", "failing"]);
    }

    #[test]
    fn test_out_of_order_table_runs_nothing() {
        let stages = [
            Stage::Start(hook("first", first)),
            Stage::Prestart(hook("second", second)),
        ];
        let mut trace = Trace::default();
        assert_eq!(
            drive(&stages, &mut trace),
            Err(BootError::StageSequence { stage: "second" })
        );
        assert!(trace.ran.is_empty());
    }

    #[test]
    fn test_single_start_hook() {
        let stages = [
            Stage::Start(hook("first", first)),
            Stage::Start(hook("second", second)),
        ];
        assert_eq!(
            validate(&stages),
            Err(BootError::StageSequence { stage: "second" })
        );
    }
}
