//! Static metadata about the built-in steps: what each one reads, what it
//! writes, and whether it is critical.
//!
//! Used by the CLI to explain and check step wiring, and to tell which
//! steps must have run before one can be invoked in isolation.

use std::fmt;

use shipwright_common::ArtifactType;

use crate::errors::CatalogError;

/// One input a step reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dep {
    Required(ArtifactType),
    /// Satisfied by whichever alternative exists; resolution follows the
    /// first one with a producer.
    AnyOf(&'static [ArtifactType]),
    /// Read when present; the step degrades without it.
    Optional(ArtifactType),
}

impl fmt::Display for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required(t) => write!(f, "{}", t),
            Self::AnyOf(alts) => {
                let names: Vec<&str> = alts.iter().map(|t| t.as_str()).collect();
                write!(f, "{}", names.join(" | "))
            }
            Self::Optional(t) => write!(f, "{} (optional)", t),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StepSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub critical: bool,
    pub dependencies: &'static [Dep],
    pub outputs: &'static [ArtifactType],
}

use ArtifactType as A;

const BUILTIN: &[StepSpec] = &[
    StepSpec {
        name: "fetch_issue",
        description: "Load the job and snapshot it as the issue artifact",
        critical: true,
        dependencies: &[],
        outputs: &[A::Issue],
    },
    StepSpec {
        name: "setup_branch",
        description: "Create or check out the working branch for the job",
        critical: true,
        dependencies: &[Dep::Required(A::Issue)],
        outputs: &[A::Branch],
    },
    StepSpec {
        name: "classify",
        description: "Classify the issue as feature, bug or chore",
        critical: true,
        dependencies: &[Dep::Required(A::Issue)],
        outputs: &[A::Classification],
    },
    StepSpec {
        name: "plan",
        description: "Ask the agent for an implementation plan",
        critical: true,
        dependencies: &[Dep::Required(A::Issue), Dep::Required(A::Classification)],
        outputs: &[A::Plan],
    },
    StepSpec {
        name: "patch_plan",
        description: "Plan a follow-up change on top of the parent run's plan",
        critical: true,
        dependencies: &[Dep::Required(A::Issue), Dep::Optional(A::Plan)],
        outputs: &[A::PatchPlan],
    },
    StepSpec {
        name: "implement",
        description: "Have the agent implement the plan",
        critical: true,
        dependencies: &[Dep::AnyOf(&[A::Plan, A::PatchPlan])],
        outputs: &[A::Implementation],
    },
    StepSpec {
        name: "review",
        description: "Have the agent review the working tree",
        critical: true,
        dependencies: &[Dep::Optional(A::Plan), Dep::Optional(A::PatchPlan)],
        outputs: &[A::Review],
    },
    StepSpec {
        name: "address_review",
        description: "Fix review findings, looping back to review while any remain",
        critical: true,
        dependencies: &[Dep::Required(A::Review)],
        outputs: &[A::ReviewAddressed],
    },
    StepSpec {
        name: "code_quality",
        description: "Run the configured quality commands",
        critical: false,
        dependencies: &[],
        outputs: &[A::QualityCheck],
    },
    StepSpec {
        name: "acceptance",
        description: "Check the result against the plan's acceptance criteria",
        critical: true,
        dependencies: &[Dep::AnyOf(&[A::Plan, A::PatchPlan])],
        outputs: &[A::Acceptance],
    },
    StepSpec {
        name: "prepare_pr",
        description: "Draft the pull request title and body",
        critical: false,
        dependencies: &[Dep::Required(A::Issue), Dep::Required(A::Acceptance)],
        outputs: &[A::PrMetadata],
    },
    StepSpec {
        name: "create_pr",
        description: "Push the branch and open a pull request",
        critical: false,
        dependencies: &[Dep::Required(A::PrMetadata), Dep::Required(A::Branch)],
        outputs: &[A::PullRequest],
    },
    StepSpec {
        name: "update_pr",
        description: "Push new commits to the existing pull request",
        critical: false,
        dependencies: &[Dep::Required(A::Branch)],
        outputs: &[],
    },
];

#[derive(Debug, Clone)]
pub struct StepCatalog {
    specs: Vec<StepSpec>,
}

impl StepCatalog {
    pub fn new(specs: Vec<StepSpec>) -> Self {
        Self { specs }
    }

    pub fn builtin() -> Self {
        Self::new(BUILTIN.to_vec())
    }

    pub fn list(&self) -> &[StepSpec] {
        &self.specs
    }

    pub fn get(&self, name: &str) -> Option<&StepSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Steps that write `artifact`, in catalog order.
    pub fn producers(&self, artifact: ArtifactType) -> Vec<&StepSpec> {
        self.specs
            .iter()
            .filter(|s| s.outputs.contains(&artifact))
            .collect()
    }

    /// Steps that must run before `name`, in an order they can run in,
    /// ending with `name` itself.
    pub fn resolve_dependencies(&self, name: &str) -> Result<Vec<&'static str>, CatalogError> {
        let mut visiting = Vec::new();
        let mut order = Vec::new();
        self.visit(name, &mut visiting, &mut order)?;
        Ok(order)
    }

    fn visit(
        &self,
        name: &str,
        visiting: &mut Vec<&'static str>,
        order: &mut Vec<&'static str>,
    ) -> Result<(), CatalogError> {
        if order.iter().any(|n| *n == name) {
            return Ok(());
        }
        if let Some(pos) = visiting.iter().position(|n| *n == name) {
            let mut cycle: Vec<String> = visiting[pos..].iter().map(|n| n.to_string()).collect();
            cycle.push(name.to_string());
            return Err(CatalogError::Cycle(cycle));
        }
        let spec = self.get(name).ok_or_else(|| CatalogError::UnknownStep {
            name: name.to_string(),
            known: self.specs.iter().map(|s| s.name.to_string()).collect(),
        })?;

        visiting.push(spec.name);
        for dep in spec.dependencies {
            let Some(artifact) = self.followed_artifact(dep) else {
                continue;
            };
            let producer = self
                .producers(artifact)
                .first()
                .map(|p| p.name)
                .ok_or_else(|| CatalogError::MissingProducer {
                    step: spec.name.to_string(),
                    artifact,
                })?;
            self.visit(producer, visiting, order)?;
        }
        visiting.pop();
        order.push(spec.name);
        Ok(())
    }

    /// The artifact resolution chases for `dep`; `None` for optional inputs.
    fn followed_artifact(&self, dep: &Dep) -> Option<ArtifactType> {
        match dep {
            Dep::Required(t) => Some(*t),
            Dep::AnyOf(alts) => alts
                .iter()
                .copied()
                .find(|t| !self.producers(*t).is_empty())
                .or_else(|| alts.first().copied()),
            Dep::Optional(_) => None,
        }
    }

    /// Problems with the catalog's wiring: inputs nobody produces and
    /// dependency cycles. Empty when the catalog is sound.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for spec in &self.specs {
            for dep in spec.dependencies {
                let unproduced = match dep {
                    Dep::Required(t) | Dep::Optional(t) => self.producers(*t).is_empty(),
                    Dep::AnyOf(alts) => alts.iter().all(|t| self.producers(*t).is_empty()),
                };
                if unproduced {
                    problems.push(format!(
                        "Step '{}' reads '{}' but no step produces it",
                        spec.name, dep
                    ));
                }
            }
            if let Err(CatalogError::Cycle(path)) = self.resolve_dependencies(spec.name) {
                let msg = format!("Dependency cycle: {}", path.join(" -> "));
                if !problems.contains(&msg) {
                    problems.push(msg);
                }
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_sound() {
        let catalog = StepCatalog::builtin();
        assert!(catalog.validate().is_empty(), "{:?}", catalog.validate());
        assert_eq!(catalog.list().len(), 13);
    }

    #[test]
    fn test_resolve_implement_chain() {
        let catalog = StepCatalog::builtin();
        let order = catalog.resolve_dependencies("implement").unwrap();
        assert_eq!(order, vec!["fetch_issue", "classify", "plan", "implement"]);
    }

    #[test]
    fn test_resolve_create_pr_chain_is_dependency_ordered() {
        let catalog = StepCatalog::builtin();
        let order = catalog.resolve_dependencies("create_pr").unwrap();
        assert_eq!(order.last(), Some(&"create_pr"));
        let pos = |n: &str| order.iter().position(|o| *o == n).unwrap();
        assert!(pos("fetch_issue") < pos("plan"));
        assert!(pos("plan") < pos("acceptance"));
        assert!(pos("acceptance") < pos("prepare_pr"));
        assert!(pos("setup_branch") < pos("create_pr"));
        assert_eq!(order.iter().filter(|n| **n == "fetch_issue").count(), 1);
    }

    #[test]
    fn test_step_without_dependencies_resolves_to_itself() {
        let catalog = StepCatalog::builtin();
        assert_eq!(
            catalog.resolve_dependencies("code_quality").unwrap(),
            vec!["code_quality"]
        );
        // Optional inputs are not chased.
        assert_eq!(catalog.resolve_dependencies("review").unwrap(), vec!["review"]);
    }

    #[test]
    fn test_unknown_step() {
        let err = StepCatalog::builtin()
            .resolve_dependencies("deploy")
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownStep { .. }));
    }

    #[test]
    fn test_missing_producer_is_reported() {
        let catalog = StepCatalog::new(vec![StepSpec {
            name: "implement",
            description: "",
            critical: true,
            dependencies: &[Dep::Required(A::Plan)],
            outputs: &[A::Implementation],
        }]);
        let err = catalog.resolve_dependencies("implement").unwrap_err();
        assert!(matches!(
            err,
            CatalogError::MissingProducer {
                artifact: A::Plan,
                ..
            }
        ));
        let problems = catalog.validate();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("plan"));
    }

    #[test]
    fn test_cycle_is_detected() {
        let catalog = StepCatalog::new(vec![
            StepSpec {
                name: "a",
                description: "",
                critical: true,
                dependencies: &[Dep::Required(A::Review)],
                outputs: &[A::Plan],
            },
            StepSpec {
                name: "b",
                description: "",
                critical: true,
                dependencies: &[Dep::Required(A::Plan)],
                outputs: &[A::Review],
            },
        ]);
        match catalog.resolve_dependencies("a").unwrap_err() {
            CatalogError::Cycle(path) => assert_eq!(path, vec!["a", "b", "a"]),
            other => panic!("Expected Cycle, got {other:?}"),
        }
        assert!(catalog.validate().iter().any(|p| p.contains("cycle")));
    }

    #[test]
    fn test_dep_display() {
        assert_eq!(Dep::Required(A::Plan).to_string(), "plan");
        assert_eq!(
            Dep::AnyOf(&[A::Plan, A::PatchPlan]).to_string(),
            "plan | patch_plan"
        );
        assert_eq!(Dep::Optional(A::Plan).to_string(), "plan (optional)");
    }
}
