//! The six function buttons, F1 to F6.
//!
//! Each slot holds a plain function that receives a [`HookContext`]. Hooks
//! drive the instrument through the command layer only.

use crate::app::AcquisitionParameters;
use crate::commands::{FitReport, Scope};
use crate::error::ScopeError;
use log::info;

pub const HOOK_COUNT: usize = 6;

pub type HookFn = fn(&mut HookContext<'_>) -> Result<HookOutcome, ScopeError>;

/// What a hook hands back to the front end.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    Nothing,
    Message(String),
    Fitted(FitReport),
}

pub struct HookContext<'a> {
    /// Settings shown in the UI; hooks that change the scale update them
    pub params: &'a mut AcquisitionParameters,
    pub scope: Scope<'a>,
}

impl HookContext<'_> {
    pub fn channel(&self) -> u8 {
        self.scope.channel()
    }
}

#[derive(Debug, Clone)]
pub struct HookSlot {
    pub label: String,
    pub name: String,
    pub handler: Option<HookFn>,
}

impl HookSlot {
    pub fn is_assigned(&self) -> bool {
        self.handler.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct HookTable {
    slots: [HookSlot; HOOK_COUNT],
}

impl Default for HookTable {
    fn default() -> Self {
        let slots = std::array::from_fn(|i| HookSlot {
            label: format!("F{}", i + 1),
            name: "Unassigned".to_string(),
            handler: Some(no_op as HookFn),
        });
        let mut table = Self { slots };
        table.slots[0].name = "Fit wave".to_string();
        table.slots[0].handler = Some(fit_wave);
        table
    }
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slots(&self) -> &[HookSlot] {
        &self.slots
    }

    pub fn get(&self, index: usize) -> Option<&HookSlot> {
        self.slots.get(index)
    }

    /// Install a handler; `None` leaves the button without an action.
    pub fn set(&mut self, index: usize, name: &str, handler: Option<HookFn>) -> Result<(), ScopeError> {
        let slot = self.slots.get_mut(index).ok_or_else(|| {
            ScopeError::Validation(format!("hook index {index} is not in 0..{HOOK_COUNT}"))
        })?;
        slot.name = name.to_string();
        slot.handler = handler;
        Ok(())
    }

    pub fn run(&self, index: usize, ctx: &mut HookContext<'_>) -> Result<HookOutcome, ScopeError> {
        let slot = self.slots.get(index).ok_or_else(|| {
            ScopeError::Validation(format!("hook index {index} is not in 0..{HOOK_COUNT}"))
        })?;
        match slot.handler {
            Some(handler) => {
                info!("Running {} ({})", slot.label, slot.name);
                // Link failures pass through untouched so the caller can drop the session
                handler(ctx).map_err(|e| match e {
                    e if e.is_link_failure() => e,
                    hook @ ScopeError::Hook(_) => hook,
                    other => ScopeError::Hook(format!("{} ({}): {other}", slot.label, slot.name)),
                })
            }
            None => Ok(HookOutcome::Nothing),
        }
    }
}

fn no_op(_ctx: &mut HookContext<'_>) -> Result<HookOutcome, ScopeError> {
    Ok(HookOutcome::Nothing)
}

fn fit_wave(ctx: &mut HookContext<'_>) -> Result<HookOutcome, ScopeError> {
    let report = ctx.scope.fit_wave()?;
    if let Some(vdiv) = report.volts_per_div {
        ctx.params.volts_per_div = Some(vdiv);
    }
    if let Some(tdiv) = report.time_per_div {
        ctx.params.time_per_div = Some(tdiv);
    }
    Ok(HookOutcome::Fitted(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::SimulatedScope;

    fn announce(ctx: &mut HookContext<'_>) -> Result<HookOutcome, ScopeError> {
        Ok(HookOutcome::Message(format!("channel {}", ctx.channel())))
    }

    #[test]
    fn test_default_table() {
        let table = HookTable::new();
        let labels: Vec<_> = table.slots().iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, ["F1", "F2", "F3", "F4", "F5", "F6"]);
        assert_eq!(table.get(0).unwrap().name, "Fit wave");
    }

    #[test]
    fn test_defaults_run() {
        let table = HookTable::new();
        let mut link = SimulatedScope::new("SIM::hooks");
        let mut params = AcquisitionParameters::default();
        let mut ctx = HookContext {
            params: &mut params,
            scope: Scope::new(&mut link, 1).unwrap(),
        };

        assert_eq!(table.run(3, &mut ctx).unwrap(), HookOutcome::Nothing);
        assert!(matches!(table.run(0, &mut ctx).unwrap(), HookOutcome::Fitted(_)));
        assert!(matches!(table.run(6, &mut ctx), Err(ScopeError::Validation(_))));
        drop(ctx);
        assert_eq!(params.time_per_div, Some(100e-6));
    }

    fn broken(_ctx: &mut HookContext<'_>) -> Result<HookOutcome, ScopeError> {
        Err(ScopeError::Validation("nothing to fit".into()))
    }

    fn unplugged(ctx: &mut HookContext<'_>) -> Result<HookOutcome, ScopeError> {
        ctx.scope.frequency()?;
        Ok(HookOutcome::Nothing)
    }

    #[test]
    fn test_handler_errors_name_the_slot() {
        let mut table = HookTable::new();
        table.set(2, "Broken", Some(broken)).unwrap();
        table.set(3, "Unplugged", Some(unplugged)).unwrap();

        let handle = crate::link::SimHandle::new();
        let mut link = handle.open_scope("SIM::hooks").unwrap();
        let mut params = AcquisitionParameters::default();
        let mut ctx = HookContext {
            params: &mut params,
            scope: Scope::new(&mut link, 1).unwrap(),
        };

        match table.run(2, &mut ctx) {
            Err(ScopeError::Hook(text)) => {
                assert!(text.starts_with("F3 (Broken)"), "{text}");
                assert!(text.contains("nothing to fit"));
            }
            other => panic!("expected hook error, got {other:?}"),
        }

        handle.set_online(false);
        let err = table.run(3, &mut ctx).unwrap_err();
        assert!(err.is_link_failure(), "{err}");
    }

    #[test]
    fn test_set_replaces_handler() {
        let mut table = HookTable::new();
        table.set(1, "Announce", Some(announce)).unwrap();
        assert!(table.set(9, "x", None).is_err());

        let mut link = SimulatedScope::new("SIM::hooks");
        let mut params = AcquisitionParameters::default();
        let mut ctx = HookContext {
            params: &mut params,
            scope: Scope::new(&mut link, 3).unwrap(),
        };
        assert_eq!(
            table.run(1, &mut ctx).unwrap(),
            HookOutcome::Message("channel 3".into())
        );
    }
}
