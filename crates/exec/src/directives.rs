//! Compiler directive files for forked workers.
//!
//! The generated harness of a job has a scheduling loop (`task_*`), one run
//! loop per role (`run_<role>`) and auxiliary helpers (`aux_*`). The rules
//! below keep each role's workload method in the execution mode it was
//! assigned while the surrounding harness stays fully optimized.

use std::fmt::Write as _;
use std::path::Path;

use forkstress_core::{DirectivesConfig, ExecMode, Job};

pub const TASK_LOOP_PREFIX: &str = "task_";
pub const RUN_LOOP_PREFIX: &str = "run_";
pub const AUX_PREFIX: &str = "aux_";

/// Compiler tier a rule can switch off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Tier1,
    Tier2,
}

impl Tier {
    fn key(self) -> &'static str {
        match self {
            Tier::Tier1 => "c1",
            Tier::Tier2 => "c2",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Force (`+`) or forbid (`-`) inlining of matching methods.
    Inline { force: bool, pattern: String },
    Exclude(Tier),
    PrintAssembly,
    BackgroundCompilation(bool),
}

impl Directive {
    pub fn inline(pattern: impl Into<String>) -> Self {
        Directive::Inline {
            force: true,
            pattern: pattern.into(),
        }
    }

    pub fn dont_inline(pattern: impl Into<String>) -> Self {
        Directive::Inline {
            force: false,
            pattern: pattern.into(),
        }
    }
}

/// Directives applied to methods matching `pattern`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub pattern: String,
    pub directives: Vec<Directive>,
}

impl Rule {
    fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            directives: Vec::new(),
        }
    }

    fn with(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    pub fn contains(&self, directive: &Directive) -> bool {
        self.directives.contains(directive)
    }
}

/// Ordered directive rules for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveSet {
    rules: Vec<Rule>,
}

impl DirectiveSet {
    /// Build the rules for `job`. Output depends only on the job's roles,
    /// their modes and the directive settings.
    pub fn for_job(job: &Job, config: &DirectivesConfig) -> Self {
        let harness = &job.harness;
        let sync = &config.sync_helper;
        let mut rules = Vec::with_capacity(2 + job.threads * 2);

        let mut task_loop = Rule::new(format!("{harness}::{TASK_LOOP_PREFIX}*"))
            .with(Directive::dont_inline(format!("{harness}::{RUN_LOOP_PREFIX}*")))
            .with(Directive::inline(format!("{harness}::{AUX_PREFIX}*")))
            .with(Directive::inline(format!("{sync}::*")));
        for extra in &config.extra_inline {
            task_loop = task_loop.with(Directive::inline(extra.clone()));
        }
        rules.push(task_loop.with(Directive::BackgroundCompilation(false)));

        rules.push(
            Rule::new(format!("{sync}::*"))
                .with(Directive::inline("*::*"))
                .with(Directive::BackgroundCompilation(false)),
        );

        for idx in 0..job.threads {
            let (role, mode) = job.role(idx);
            let workload = format!("{}::{role}", job.name);
            let mut rule = Rule::new(format!("{harness}::{RUN_LOOP_PREFIX}{role}"))
                .with(Directive::inline(format!("{harness}::{AUX_PREFIX}*")));
            rule = match mode {
                ExecMode::Interpreted => rule.with(Directive::dont_inline(workload)),
                ExecMode::Tier1 => rule
                    .with(Directive::inline(workload))
                    .with(Directive::Exclude(Tier::Tier2)),
                ExecMode::Tier2 => rule
                    .with(Directive::inline(workload))
                    .with(Directive::Exclude(Tier::Tier1)),
            };
            if config.print_assembly && mode.is_compiled() {
                rule = rule.with(Directive::PrintAssembly);
            }
            rules.push(rule.with(Directive::BackgroundCompilation(false)));
        }

        for idx in 0..job.threads {
            let (role, mode) = job.role(idx);
            if mode.is_interpreted() {
                rules.push(
                    Rule::new(format!("+{}::{role}", job.name))
                        .with(Directive::Exclude(Tier::Tier1))
                        .with(Directive::Exclude(Tier::Tier2)),
                );
            }
        }

        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Render in the bracketed HotSpot directive syntax.
    pub fn render(&self) -> String {
        let mut out = String::from("[\n");
        for rule in &self.rules {
            out.push_str("  {\n");
            let _ = writeln!(out, "    match: \"{}\",", rule.pattern);
            for directive in &rule.directives {
                match directive {
                    Directive::Inline { force, pattern } => {
                        let sign = if *force { '+' } else { '-' };
                        let _ = writeln!(out, "    inline: \"{sign}{pattern}\",");
                    }
                    Directive::Exclude(tier) => {
                        let _ = writeln!(out, "    {}: {{", tier.key());
                        out.push_str("      Exclude: true,\n");
                        out.push_str("    },\n");
                    }
                    Directive::PrintAssembly => out.push_str("    PrintAssembly: true,\n"),
                    Directive::BackgroundCompilation(on) => {
                        let _ = writeln!(out, "    BackgroundCompilation: {on},");
                    }
                }
            }
            out.push_str("  },\n");
        }
        out.push_str("]\n");
        out
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forkstress_core::DispatchMode;

    fn mixed_job() -> Job {
        Job::uniform("t.Mixed", "t.Mixed_Harness", &["actor1", "actor2"], ExecMode::Tier2, DispatchMode::Forked)
            .with_modes(vec![ExecMode::Interpreted, ExecMode::Tier2])
    }

    #[test]
    fn mixed_modes_pin_each_role() {
        let set = DirectiveSet::for_job(&mixed_job(), &DirectivesConfig::default());
        let rules = set.rules();
        assert_eq!(rules.len(), 5);

        let role0 = &rules[2];
        assert_eq!(role0.pattern, "t.Mixed_Harness::run_actor1");
        assert!(role0.contains(&Directive::dont_inline("t.Mixed::actor1")));
        assert!(!role0.contains(&Directive::Exclude(Tier::Tier1)));

        let role1 = &rules[3];
        assert_eq!(role1.pattern, "t.Mixed_Harness::run_actor2");
        assert!(role1.contains(&Directive::inline("t.Mixed::actor2")));
        assert!(role1.contains(&Directive::Exclude(Tier::Tier1)));

        let pinned = &rules[4];
        assert_eq!(pinned.pattern, "+t.Mixed::actor1");
        assert!(pinned.contains(&Directive::Exclude(Tier::Tier1)));
        assert!(pinned.contains(&Directive::Exclude(Tier::Tier2)));
    }

    #[test]
    fn task_loop_rule_comes_first() {
        let set = DirectiveSet::for_job(&mixed_job(), &DirectivesConfig::default());
        let task = &set.rules()[0];
        assert_eq!(task.pattern, "t.Mixed_Harness::task_*");
        assert!(task.contains(&Directive::dont_inline("t.Mixed_Harness::run_*")));
        assert!(task.contains(&Directive::inline("forkstress.runtime.WorkerSync::*")));
        assert!(task.contains(&Directive::inline("java.util.concurrent.atomic.*::*")));
        assert_eq!(task.directives.last(), Some(&Directive::BackgroundCompilation(false)));

        let sync = &set.rules()[1];
        assert_eq!(sync.pattern, "forkstress.runtime.WorkerSync::*");
        assert!(sync.contains(&Directive::inline("*::*")));
    }

    #[test]
    fn print_assembly_only_for_compiled_roles() {
        let config = DirectivesConfig {
            print_assembly: true,
            ..DirectivesConfig::default()
        };
        let set = DirectiveSet::for_job(&mixed_job(), &config);
        assert!(!set.rules()[2].contains(&Directive::PrintAssembly));
        assert!(set.rules()[3].contains(&Directive::PrintAssembly));
    }

    #[test]
    fn tier1_role_excludes_tier2() {
        let job = Job::uniform("t.One", "h", &["a"], ExecMode::Tier1, DispatchMode::Forked);
        let set = DirectiveSet::for_job(&job, &DirectivesConfig::default());
        assert_eq!(set.rules().len(), 3);
        assert!(set.rules()[2].contains(&Directive::Exclude(Tier::Tier2)));
    }

    #[test]
    fn renders_bracketed_rules() {
        let set = DirectiveSet::for_job(&mixed_job(), &DirectivesConfig::default());
        let text = set.render();
        assert!(text.starts_with("[\n  {\n    match: \"t.Mixed_Harness::task_*\",\n"));
        assert!(text.contains("    inline: \"-t.Mixed::actor1\",\n"));
        assert!(text.contains("    inline: \"+t.Mixed::actor2\",\n"));
        assert!(text.contains("    c1: {\n      Exclude: true,\n    },\n"));
        assert!(text.contains("    BackgroundCompilation: false,\n"));
        assert!(text.contains("  {\n    match: \"+t.Mixed::actor1\",\n    c1: {\n"));
        assert!(text.ends_with("  },\n]\n"));
        assert_eq!(text, DirectiveSet::for_job(&mixed_job(), &DirectivesConfig::default()).render());
    }

    #[test]
    fn write_to_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("directives.json");
        let set = DirectiveSet::for_job(&mixed_job(), &DirectivesConfig::default());
        set.write_to(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), set.render());
    }
}
