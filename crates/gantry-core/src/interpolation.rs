use regex::Regex;
use std::collections::HashMap;

/// Context for variable interpolation.
#[derive(Debug, Clone, Default)]
pub struct InterpolationContext {
    /// Process-wide environment surface plus per-step overrides
    pub env: HashMap<String, String>,
    /// Matrix values for the current job instance
    pub matrix: HashMap<String, String>,
    /// The triggering git ref
    pub git_ref: String,
}

impl InterpolationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpolate variables in a string.
    ///
    /// Supports:
    /// - `${{ matrix.key }}` - matrix axis value
    /// - `${{ env.VAR }}` - environment value
    /// - `${{ ref }}` - the triggering git ref
    ///
    /// Unknown expressions resolve to the empty string.
    pub fn interpolate(&self, input: &str) -> String {
        if !input.contains("${{") {
            return input.to_string();
        }
        let re = Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").expect("valid interpolation regex");

        re.replace_all(input, |caps: &regex::Captures| {
            let expr = caps.get(1).map_or("", |m| m.as_str()).trim();
            self.resolve_expression(expr)
        })
        .to_string()
    }

    fn resolve_expression(&self, expr: &str) -> String {
        if let Some(key) = expr.strip_prefix("matrix.") {
            return self.matrix.get(key).cloned().unwrap_or_default();
        }
        if let Some(var) = expr.strip_prefix("env.") {
            return self.env.get(var).cloned().unwrap_or_default();
        }
        if expr == "ref" {
            return self.git_ref.clone();
        }
        String::new()
    }
}
