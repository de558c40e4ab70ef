use crate::error::SolverError;
use crate::warn_once;

/// A single solve target: the trial argument being solved for, and the
/// optional test argument a scalar functional is differentiated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEntry {
    pub trial: String,
    pub test: Option<String>,
}

/// How the solution of a solve is handed back to the caller.
///
/// The convention is fixed at parse time by the textual form of the target
/// specification, not by the number of targets: `"u"` is bare, `"u,"` is a
/// genuine 1-tuple, and any colon-containing form is a name-keyed mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnConvention {
    Bare,
    Tuple,
    Named,
}

/// An ordered list of solve targets with its return convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetList {
    entries: Vec<TargetEntry>,
    convention: ReturnConvention,
}

impl TargetList {
    /// Parses a textual target specification.
    ///
    /// Rules, in priority order:
    ///
    /// 1. A colon inside a component splits it into a `trial:test` pair and
    ///    switches the whole specification to the name-keyed return
    ///    convention, even for a single component.
    /// 2. Commas split the string into independent components. A single
    ///    trailing comma with no following component marks the spec as a
    ///    1-tuple rather than a bare name, changing the return convention
    ///    from a bare value to a 1-tuple of values.
    /// 3. A plain name is a bare single target.
    pub fn parse(spec: &str) -> Result<TargetList, SolverError> {
        let named = spec.contains(':');
        let mut components: Vec<&str> = spec.split(',').collect();

        let convention = if named {
            ReturnConvention::Named
        } else if components.len() > 1 {
            ReturnConvention::Tuple
        } else {
            ReturnConvention::Bare
        };

        // A trailing comma produces one empty final component. Dropping it
        // keeps the tuple convention established above; for a single name
        // this is the deliberate 1-tuple disambiguation.
        if components.len() > 1 && components.last() == Some(&"") {
            components.pop();
            if components.len() == 1 && !named {
                warn_once!(
                    "target specification `{}` relies on a trailing comma to denote a 1-tuple; \
                     prefer an explicit list of target names",
                    spec
                );
            }
        }

        let mut entries = Vec::with_capacity(components.len());
        for component in components {
            entries.push(parse_component(component, spec)?);
        }

        Self::new(entries, convention)
    }

    /// Builds a target list from pre-parsed component names. The result
    /// always uses the tuple return convention, mirroring an explicit
    /// tuple in the textual form.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<TargetList, SolverError> {
        let entries = names
            .iter()
            .map(|name| {
                validate_name(name.as_ref(), name.as_ref())?;
                Ok(TargetEntry {
                    trial: name.as_ref().to_string(),
                    test: None,
                })
            })
            .collect::<Result<Vec<_>, SolverError>>()?;
        Self::new(entries, ReturnConvention::Tuple)
    }

    /// Builds a target list from pre-parsed trial/test pairs, the
    /// structured counterpart of the colon form. Any pair with a test
    /// argument switches the whole list to the name-keyed return
    /// convention, exactly as a colon does in the textual form; a list of
    /// bare trials uses the tuple convention.
    pub fn from_entries<S: AsRef<str>>(pairs: &[(S, Option<S>)]) -> Result<TargetList, SolverError> {
        let entries = pairs
            .iter()
            .map(|(trial, test)| {
                validate_name(trial.as_ref(), trial.as_ref())?;
                if let Some(test) = test {
                    validate_name(test.as_ref(), test.as_ref())?;
                }
                Ok(TargetEntry {
                    trial: trial.as_ref().to_string(),
                    test: test.as_ref().map(|s| s.as_ref().to_string()),
                })
            })
            .collect::<Result<Vec<_>, SolverError>>()?;
        let convention = if entries.iter().any(|entry| entry.test.is_some()) {
            ReturnConvention::Named
        } else {
            ReturnConvention::Tuple
        };
        Self::new(entries, convention)
    }

    fn new(entries: Vec<TargetEntry>, convention: ReturnConvention) -> Result<TargetList, SolverError> {
        if entries.is_empty() {
            return Err(SolverError::Configuration(
                "target specification contains no targets".to_string(),
            ));
        }
        for (i, entry) in entries.iter().enumerate() {
            if entries[..i].iter().any(|other| other.trial == entry.trial) {
                return Err(SolverError::Configuration(format!(
                    "target argument `{}` appears more than once",
                    entry.trial
                )));
            }
        }
        Ok(TargetList { entries, convention })
    }

    pub fn convention(&self) -> ReturnConvention {
        self.convention
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TargetEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetEntry> {
        self.entries.iter()
    }

    pub fn trial_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.trial.as_str())
    }
}

fn parse_component(component: &str, spec: &str) -> Result<TargetEntry, SolverError> {
    let mut parts = component.split(':');
    // split always yields at least one part
    let trial = parts.next().unwrap_or("");
    let test = parts.next();
    if parts.next().is_some() {
        return Err(SolverError::Configuration(format!(
            "target component `{}` in `{}` contains more than one colon",
            component, spec
        )));
    }
    validate_name(trial, spec)?;
    if let Some(test) = test {
        validate_name(test, spec)?;
    }
    Ok(TargetEntry {
        trial: trial.to_string(),
        test: test.map(|s| s.to_string()),
    })
}

fn validate_name(name: &str, spec: &str) -> Result<(), SolverError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_alphabetic() || first == '_') && chars.all(|c| c.is_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SolverError::Configuration(format!(
            "`{}` is not a valid argument name in target specification `{}`",
            name, spec
        )))
    }
}
