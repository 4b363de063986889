use alertpush_common::types::KV;

/// Label carrying the metric name in a Prometheus series.
pub const METRIC_NAME_LABEL: &str = "__name__";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Unix seconds.
    pub timestamp: f64,
    /// `NaN` marks a gap in the series.
    pub value: f64,
}

/// One time series of a range query result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    pub labels: KV,
    pub samples: Vec<Sample>,
}

pub type Matrix = Vec<Series>;

impl Series {
    pub fn new(labels: KV, samples: Vec<Sample>) -> Self {
        Self { labels, samples }
    }

    /// The bracketed label part of the display string, used as legend text.
    pub fn legend(&self) -> Option<String> {
        let pairs: Vec<String> = self
            .labels
            .iter()
            .filter(|(k, _)| k.as_str() != METRIC_NAME_LABEL)
            .map(|(k, v)| format!("{k}=\"{v}\""))
            .collect();
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join(", "))
        }
    }

    /// Whether this series describes the alert with `labels`: the two share
    /// at least one label and every shared label has the same value.
    pub fn matches(&self, labels: &KV) -> bool {
        let mut shared = false;
        for (k, v) in self.labels.iter() {
            if let Some(expected) = labels.get(k) {
                if expected != v {
                    return false;
                }
                shared = true;
            }
        }
        shared
    }
}

/// Formats as `name{k="v", ...}`, the way Prometheus prints a metric.
impl std::fmt::Display for Series {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = self.labels.get(METRIC_NAME_LABEL).unwrap_or_default();
        match self.legend() {
            Some(legend) => write!(f, "{name}{{{legend}}}"),
            None if name.is_empty() => write!(f, "{{}}"),
            None => write!(f, "{name}"),
        }
    }
}
