//! Per-script runtime records and the tier-up / tier-down policy.
//!
//! A script climbs Interpreter → BaselineInterpreter → Baseline → Optimized
//! as its warm-up counter crosses the configured thresholds. The counter is
//! bumped on every call entry and every loop back-edge. Invalidation and
//! repeated bailouts push it back down to the baseline tiers.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::runner::config::EngineOptions;
use crate::runner::ds::object::ObjectId;
use crate::runner::jit::baseline::BaselineCode;
use crate::runner::jit::bytecode::Script;
use crate::runner::jit::ic::IcSlot;
use crate::runner::jit::opt::{OptimizationReport, OptimizedCode};

/// Index of a script's runtime record inside its realm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExecutionTier {
    Interpreter,
    BaselineInterpreter,
    Baseline,
    Optimized,
}

impl ExecutionTier {
    /// Name reported by `getJitTier()`.
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionTier::Interpreter => "interpreter",
            ExecutionTier::BaselineInterpreter => "baseline-interpreter",
            ExecutionTier::Baseline => "baseline",
            ExecutionTier::Optimized => "ion",
        }
    }

    pub fn is_jit(&self) -> bool {
        matches!(self, ExecutionTier::Baseline | ExecutionTier::Optimized)
    }
}

/// What the VM should do after a warm-up tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TierAction {
    None,
    EnterBaselineInterpreter,
    CompileBaseline,
    TrialInline,
    CompileOptimized,
}

pub struct ScriptRuntime {
    pub id: ScriptId,
    pub script: Arc<Script>,
    pub ics: Vec<IcSlot>,
    pub warmup: u32,
    pub tier: ExecutionTier,
    pub baseline: Option<Arc<BaselineCode>>,
    pub optimized: Option<Arc<OptimizedCode>>,
    /// Bumped on every invalidation; compiled code from an older epoch is
    /// never installed or entered.
    pub epoch: u64,
    pub bailouts: u32,
    pub invalidations: u32,
    pub ion_disabled: bool,
    pub baseline_failed: bool,
    pub trial_inlined: bool,
    /// An off-thread compilation has been queued and not yet installed.
    pub ion_pending: bool,
    /// Warm-up value at the last stub attachment in any of the script's ICs.
    pub last_attach_warmup: u32,
    /// Assertion outcomes recorded by the most recent optimized compilation.
    pub report: OptimizationReport,
}

impl ScriptRuntime {
    pub fn new(id: ScriptId, script: Arc<Script>) -> Self {
        let ics = script
            .ic_sites
            .iter()
            .map(|site| IcSlot::new(site.kind, site.pc))
            .collect();
        ScriptRuntime {
            id,
            script,
            ics,
            warmup: 0,
            tier: ExecutionTier::Interpreter,
            baseline: None,
            optimized: None,
            epoch: 0,
            bailouts: 0,
            invalidations: 0,
            ion_disabled: false,
            baseline_failed: false,
            trial_inlined: false,
            ion_pending: false,
            last_attach_warmup: 0,
            report: OptimizationReport::default(),
        }
    }

    /// Optimized code that may still be entered.
    pub fn live_optimized(&self) -> Option<&Arc<OptimizedCode>> {
        self.optimized
            .as_ref()
            .filter(|code| code.epoch == self.epoch && !code.invalidated.load(Ordering::SeqCst))
    }

    /// The tier a new activation of this script starts in.
    pub fn entry_tier(&self) -> ExecutionTier {
        match self.tier {
            ExecutionTier::Optimized if self.live_optimized().is_none() => self.resume_tier(),
            ExecutionTier::Baseline if self.baseline.is_none() => ExecutionTier::BaselineInterpreter,
            tier => tier,
        }
    }

    /// The tier a frame continues in after leaving optimized code.
    pub fn resume_tier(&self) -> ExecutionTier {
        if self.baseline.is_some() {
            ExecutionTier::Baseline
        } else if self.tier > ExecutionTier::Interpreter {
            ExecutionTier::BaselineInterpreter
        } else {
            ExecutionTier::Interpreter
        }
    }

    /// Counts one warm-up tick and decides the next tier transition.
    /// `hinted` is set when an earlier, identical script reached Baseline.
    pub fn tick(&mut self, options: &EngineOptions, hinted: bool) -> TierAction {
        self.warmup = self.warmup.saturating_add(1);
        self.next_action(options, hinted)
    }

    pub fn next_action(&self, options: &EngineOptions, hinted: bool) -> TierAction {
        let len = self.script.code.len();
        if self.tier == ExecutionTier::Interpreter
            && options.enable_blinterp
            && self.warmup >= options.blinterp_warmup_threshold
        {
            return TierAction::EnterBaselineInterpreter;
        }
        if self.tier < ExecutionTier::Baseline
            && options.enable_baseline
            && !self.baseline_failed
            && len <= options.baseline_max_script_length
            && (self.warmup >= options.baseline_warmup_threshold || hinted)
        {
            return TierAction::CompileBaseline;
        }
        let baseline_done = self.tier >= ExecutionTier::Baseline || !options.enable_baseline;
        if baseline_done
            && !self.trial_inlined
            && self.warmup >= options.trial_inlining_warmup_threshold
        {
            return TierAction::TrialInline;
        }
        if baseline_done
            && self.tier != ExecutionTier::Optimized
            && options.enable_ion
            && !self.ion_disabled
            && !self.ion_pending
            && self.live_optimized().is_none()
            && self.is_ion_eligible(options)
            && self.warmup >= options.ion_warmup_threshold
            && self.warmup.saturating_sub(self.last_attach_warmup) >= options.ic_stability_window
        {
            return TierAction::CompileOptimized;
        }
        TierAction::None
    }

    /// Structural limits on optimized compilation.
    pub fn is_ion_eligible(&self, options: &EngineOptions) -> bool {
        !self.script.has_handlers()
            && !self.script.has_debugger
            && self.script.code.len() <= options.ion_max_script_length
    }

    /// Records an IC attachment for stability tracking.
    pub fn note_attach(&mut self) {
        self.last_attach_warmup = self.warmup;
    }

    /// Drops optimized code after invalidation and moves the script back to
    /// its best baseline tier. Scripts invalidated too often stop being
    /// optimized and have their IC feedback reset.
    pub fn demote(&mut self, options: &EngineOptions) {
        self.optimized = None;
        self.ion_pending = false;
        self.epoch += 1;
        self.invalidations += 1;
        self.bailouts = 0;
        self.warmup = 0;
        self.tier = self.resume_tier();
        if self.tier == ExecutionTier::BaselineInterpreter && !options.enable_blinterp {
            self.tier = ExecutionTier::Interpreter;
        }
        if self.invalidations > options.max_invalidations {
            self.ion_disabled = true;
            for ic in &mut self.ics {
                ic.reset();
            }
            tracing::debug!(script = %self.script.display_name(), "optimization disabled after repeated invalidation");
        }
    }

    /// Counts a bailout. Returns true once the script has bailed out often
    /// enough that its optimized code should be thrown away.
    pub fn note_bailout(&mut self, options: &EngineOptions) -> bool {
        self.bailouts += 1;
        self.bailouts > options.bailout_threshold
    }

    pub fn trace(&self, mut visit: impl FnMut(ObjectId)) {
        for ic in &self.ics {
            ic.trace(&mut visit);
        }
        if let Some(code) = &self.optimized {
            for id in &code.graph.object_refs {
                visit(*id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::JsParser;
    use crate::runner::jit::compiler::compile_script;

    fn runtime(source: &str) -> ScriptRuntime {
        let program = JsParser::parse_to_ast_from_str(source).unwrap();
        let name: Arc<str> = Arc::from("test.js");
        let script = compile_script(&program, &name, 0, false).unwrap();
        ScriptRuntime::new(ScriptId(0), Arc::new(script))
    }

    #[test]
    fn tiers_follow_thresholds() {
        let options = EngineOptions {
            blinterp_warmup_threshold: 2,
            baseline_warmup_threshold: 4,
            trial_inlining_warmup_threshold: 6,
            ion_warmup_threshold: 8,
            ic_stability_window: 0,
            ..EngineOptions::default()
        };
        let mut rt = runtime("var x = 1;");
        assert_eq!(rt.tick(&options, false), TierAction::None);
        assert_eq!(rt.tick(&options, false), TierAction::EnterBaselineInterpreter);
        rt.tier = ExecutionTier::BaselineInterpreter;
        rt.warmup = 4;
        assert_eq!(rt.next_action(&options, false), TierAction::CompileBaseline);
        rt.tier = ExecutionTier::Baseline;
        rt.warmup = 6;
        assert_eq!(rt.next_action(&options, false), TierAction::TrialInline);
        rt.trial_inlined = true;
        rt.warmup = 8;
        assert_eq!(rt.next_action(&options, false), TierAction::CompileOptimized);
    }

    #[test]
    fn baseline_hint_skips_the_wait() {
        let options = EngineOptions::default();
        let mut rt = runtime("var x = 1;");
        rt.tier = ExecutionTier::BaselineInterpreter;
        rt.warmup = 1;
        assert_eq!(rt.next_action(&options, true), TierAction::CompileBaseline);
    }

    #[test]
    fn unstable_ics_delay_optimization() {
        let options = EngineOptions {
            ion_warmup_threshold: 1,
            trial_inlining_warmup_threshold: 1,
            ic_stability_window: 10,
            ..EngineOptions::default()
        };
        let mut rt = runtime("var x = 1;");
        rt.tier = ExecutionTier::Baseline;
        rt.trial_inlined = true;
        rt.warmup = 20;
        rt.note_attach();
        assert_eq!(rt.next_action(&options, false), TierAction::None);
        rt.warmup = 30;
        assert_eq!(rt.next_action(&options, false), TierAction::CompileOptimized);
    }

    #[test]
    fn repeated_invalidation_disables_optimization() {
        let options = EngineOptions { max_invalidations: 1, ..EngineOptions::default() };
        let mut rt = runtime("var x = 1;");
        rt.tier = ExecutionTier::Optimized;
        rt.demote(&options);
        assert!(!rt.ion_disabled);
        assert_eq!(rt.tier, ExecutionTier::BaselineInterpreter);
        assert_eq!(rt.epoch, 1);
        rt.demote(&options);
        assert!(rt.ion_disabled);
    }

    #[test]
    fn scripts_with_handlers_are_not_optimized() {
        let options = EngineOptions::default();
        let rt = runtime("try { x; } catch (e) {}");
        assert!(!rt.is_ion_eligible(&options));
    }
}
