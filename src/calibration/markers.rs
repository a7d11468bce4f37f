//! Marker classification against the configured regex rules.

use regex::{Regex, RegexBuilder};

use crate::config::MarkerSection;
use crate::error::{DaqError, Result};

/// One classification rule.
#[derive(Debug, Clone)]
pub struct MarkerRule {
    marker_type: String,
    regex: Regex,
    value_group: usize,
}

impl MarkerRule {
    /// Compiles a rule. The pattern is matched case-insensitively and
    /// anchored at the start of the marker string.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the pattern does not compile or
    /// `value_group` is not a group of the pattern.
    pub fn new(marker_type: &str, pattern: &str, value_group: usize) -> Result<Self> {
        let regex = RegexBuilder::new(&format!("^(?:{})", pattern))
            .case_insensitive(true)
            .build()
            .map_err(|e| DaqError::config(format!("marker [{}] regex: {}", marker_type, e)))?;

        let groups = regex.captures_len() - 1;
        if value_group > groups {
            return Err(DaqError::config(format!(
                "marker [{}] value_group {} but regex has {} capture groups",
                marker_type, value_group, groups
            )));
        }

        Ok(Self {
            marker_type: marker_type.to_string(),
            regex,
            value_group,
        })
    }

    pub fn marker_type(&self) -> &str {
        &self.marker_type
    }

    fn classify(&self, marker: &str) -> Option<(String, String)> {
        let caps = self.regex.captures(marker)?;
        let value = if self.value_group == 0 {
            String::new()
        } else {
            caps.get(self.value_group)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        };
        Some((self.marker_type.clone(), value))
    }
}

/// Ordered marker rules, first match wins.
#[derive(Debug, Clone, Default)]
pub struct MarkerClassifier {
    rules: Vec<MarkerRule>,
}

impl MarkerClassifier {
    pub fn new(rules: Vec<MarkerRule>) -> Self {
        Self { rules }
    }

    pub fn from_sections(sections: &[MarkerSection]) -> Result<Self> {
        let rules = sections
            .iter()
            .map(|s| MarkerRule::new(&s.marker_type, &s.regex, s.value_group))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[MarkerRule] {
        &self.rules
    }

    /// Classifies a marker string into `(type, value)`.
    ///
    /// Both are empty when no rule matches.
    ///
    /// # Examples
    ///
    /// ```
    /// use daq_telemetry::calibration::{MarkerClassifier, MarkerRule};
    ///
    /// let classifier = MarkerClassifier::new(vec![
    ///     MarkerRule::new("test_begin", "test_begin:(.+)", 1)?,
    /// ]);
    /// assert_eq!(
    ///     classifier.classify_marker("TEST_BEGIN:t1"),
    ///     ("test_begin".to_string(), "t1".to_string())
    /// );
    /// assert_eq!(classifier.classify_marker("other"), (String::new(), String::new()));
    /// # Ok::<(), daq_telemetry::error::DaqError>(())
    /// ```
    pub fn classify_marker(&self, marker: &str) -> (String, String) {
        self.rules
            .iter()
            .find_map(|rule| rule.classify(marker))
            .unwrap_or_default()
    }
}
