//! Call-site attribution attached to allocations. Purely advisory text.

use std::fmt;
use std::panic::Location;

/// Where an allocation was requested from.
///
/// Usually captured implicitly: the public allocation API is `#[track_caller]`,
/// so file and line point at user code. [`call_site!`](crate::call_site) also
/// records the enclosing function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSite {
    pub file: &'static str,
    pub line: u32,
    pub function: Option<String>,
    /// Short label for the kind of allocation, e.g. `TrackedVec<>`.
    pub kind: Option<&'static str>,
}

impl CallSite {
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self {
            file: location.file(),
            line: location.line(),
            function: None,
            kind: None,
        }
    }

    pub fn new(file: &'static str, line: u32) -> Self {
        Self {
            file,
            line,
            function: None,
            kind: None,
        }
    }

    pub fn with_function(mut self, function: &str) -> Self {
        self.function = Some(shorten_function_name(function));
        self
    }

    pub fn with_kind(mut self, kind: &'static str) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Kind label only if none was set yet.
    pub(crate) fn or_kind(mut self, kind: &'static str) -> Self {
        self.kind.get_or_insert(kind);
        self
    }

    /// Rendered form stored in the ledger: `file:line: function  kind`.
    pub fn signature(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)?;
        if let Some(function) = &self.function {
            write!(f, ": {}", function)?;
        }
        if let Some(kind) = self.kind {
            write!(f, "  {}", kind)?;
        }
        Ok(())
    }
}

/// Keeps the last two path segments, e.g. `crate::module::func` -> `module::func`.
pub fn shorten_function_name(function_name: &str) -> String {
    let parts: Vec<&str> = function_name.split("::").collect();
    if parts.len() > 2 {
        parts[parts.len() - 2..].join("::")
    } else {
        function_name.to_string()
    }
}

/// Captures a [`CallSite`] including the enclosing function path.
///
/// # Examples
///
/// ```rust
/// fn load_assets() -> alloc_ledger::CallSite {
///     alloc_ledger::call_site!()
/// }
///
/// let site = load_assets();
/// assert!(site.function.unwrap().ends_with("load_assets"));
/// ```
#[macro_export]
macro_rules! call_site {
    () => {{
        fn __here() {}
        fn __type_name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        let name = __type_name_of(__here);
        let name = name.strip_suffix("::__here").unwrap_or(name);
        $crate::CallSite::new(file!(), line!()).with_function(name)
    }};
    ($kind:expr) => {
        $crate::call_site!().with_kind($kind)
    };
}
