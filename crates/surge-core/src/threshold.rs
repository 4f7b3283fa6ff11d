//! Pass/fail thresholds over a run's aggregate metrics
//!
//! Expressions use the k6 syntax: `p(99)<1000`, `avg<=200`, `med<100`,
//! `max<3000` on latency in milliseconds, `rate<0.05` on the error rate and
//! `count>0` on the request count.

use crate::aggregator::{MetricsAggregator, OverallMetrics};
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Aggregate metric a threshold reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdMetric {
    /// Request latency (k6 `http_req_duration`)
    Latency,
    /// Failed request ratio (k6 `http_req_failed`)
    ErrorRate,
    /// Total requests (k6 `http_reqs`)
    RequestCount,
}

impl ThresholdMetric {
    pub fn k6_name(&self) -> &'static str {
        match self {
            Self::Latency => "http_req_duration",
            Self::ErrorRate => "http_req_failed",
            Self::RequestCount => "http_reqs",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    /// Percentile in (0, 100]
    Percentile(f64),
    Avg,
    Med,
    Max,
    Rate,
    Count,
}

impl Aggregation {
    pub fn metric(&self) -> ThresholdMetric {
        match self {
            Self::Percentile(_) | Self::Avg | Self::Med | Self::Max => ThresholdMetric::Latency,
            Self::Rate => ThresholdMetric::ErrorRate,
            Self::Count => ThresholdMetric::RequestCount,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn holds(&self, actual: f64, limit: f64) -> bool {
        match self {
            Self::Lt => actual < limit,
            Self::Le => actual <= limit,
            Self::Gt => actual > limit,
            Self::Ge => actual >= limit,
        }
    }
}

/// One parsed threshold expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    expression: String,
    aggregation: Aggregation,
    comparison: Comparison,
    limit: f64,
}

impl Threshold {
    pub fn parse(expression: &str) -> EngineResult<Self> {
        let expr = expression.trim();
        let op_at = expr
            .find(|c: char| c == '<' || c == '>')
            .ok_or_else(|| EngineError::invalid_threshold(expr, "missing comparison operator"))?;

        let lhs = expr[..op_at].trim();
        let rest = &expr[op_at..];
        let (comparison, rhs) = if let Some(r) = rest.strip_prefix("<=") {
            (Comparison::Le, r)
        } else if let Some(r) = rest.strip_prefix(">=") {
            (Comparison::Ge, r)
        } else if let Some(r) = rest.strip_prefix('<') {
            (Comparison::Lt, r)
        } else {
            (Comparison::Gt, &rest[1..])
        };

        let limit: f64 = rhs
            .trim()
            .parse()
            .map_err(|_| EngineError::invalid_threshold(expr, "limit is not a number"))?;
        if !limit.is_finite() {
            return Err(EngineError::invalid_threshold(expr, "limit must be finite"));
        }

        let aggregation = match lhs {
            "avg" => Aggregation::Avg,
            "med" => Aggregation::Med,
            "max" => Aggregation::Max,
            "rate" => Aggregation::Rate,
            "count" => Aggregation::Count,
            _ => {
                let inner = lhs
                    .strip_prefix("p(")
                    .and_then(|s| s.strip_suffix(')'))
                    .ok_or_else(|| {
                        EngineError::invalid_threshold(expr, format!("unknown aggregation `{}`", lhs))
                    })?;
                let p: f64 = inner.trim().parse().map_err(|_| {
                    EngineError::invalid_threshold(expr, "percentile is not a number")
                })?;
                if !(p > 0.0 && p <= 100.0) {
                    return Err(EngineError::invalid_threshold(
                        expr,
                        "percentile must be in (0, 100]",
                    ));
                }
                Aggregation::Percentile(p)
            }
        };

        Ok(Self {
            expression: expr.to_string(),
            aggregation,
            comparison,
            limit,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    pub fn metric(&self) -> ThresholdMetric {
        self.aggregation.metric()
    }

    pub fn limit(&self) -> f64 {
        self.limit
    }

    /// Check against `inputs`. A metric with no observations is skipped.
    pub fn check(&self, inputs: &ThresholdInputs) -> Option<ThresholdViolation> {
        let actual = inputs.value_of(self.aggregation)?;
        if self.comparison.holds(actual, self.limit) {
            return None;
        }
        Some(ThresholdViolation {
            metric: self.metric().k6_name().to_string(),
            expression: self.expression.clone(),
            actual,
        })
    }
}

impl FromStr for Threshold {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl Serialize for Threshold {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.expression)
    }
}

impl<'de> Deserialize<'de> for Threshold {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Observed values thresholds are evaluated against.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ThresholdInputs {
    pub avg_ms: Option<f64>,
    pub med_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub error_rate: f64,
    pub request_count: u64,
    pub(crate) percentiles: Vec<(f64, f64)>,
}

impl ThresholdInputs {
    /// Inputs from the overall summary, with p50/p90/p95/p99 filled in.
    pub fn from_overall(overall: &OverallMetrics) -> Self {
        let mut inputs = Self {
            error_rate: overall.error_rate,
            request_count: overall.total_requests,
            ..Default::default()
        };
        if overall.total_requests > 0 {
            let l = &overall.latency;
            inputs.avg_ms = Some(l.avg_ms);
            inputs.med_ms = Some(l.p50_ms);
            inputs.max_ms = Some(l.max_ms);
            for (p, v) in [(50.0, l.p50_ms), (90.0, l.p90_ms), (95.0, l.p95_ms), (99.0, l.p99_ms)] {
                inputs = inputs.with_percentile(p, v);
            }
        }
        inputs
    }

    /// Inputs for `thresholds`, computing any percentile the summary does not
    /// carry straight from the aggregator's samples.
    pub fn collect(
        aggregator: &MetricsAggregator,
        overall: &OverallMetrics,
        thresholds: &[Threshold],
    ) -> Self {
        let mut inputs = Self::from_overall(overall);
        for threshold in thresholds {
            if let Aggregation::Percentile(p) = threshold.aggregation {
                if inputs.percentile(p).is_none() {
                    if let Some(v) = aggregator.latency_percentile_ms(p) {
                        inputs = inputs.with_percentile(p, v);
                    }
                }
            }
        }
        inputs
    }

    /// Supply or replace a latency percentile, e.g. one computed externally.
    pub fn with_percentile(mut self, p: f64, ms: f64) -> Self {
        match self.percentiles.iter_mut().find(|(q, _)| *q == p) {
            Some(entry) => entry.1 = ms,
            None => self.percentiles.push((p, ms)),
        }
        self
    }

    pub fn percentile(&self, p: f64) -> Option<f64> {
        self.percentiles
            .iter()
            .find(|(q, _)| *q == p)
            .map(|(_, v)| *v)
    }

    fn value_of(&self, aggregation: Aggregation) -> Option<f64> {
        match aggregation {
            Aggregation::Percentile(p) => self.percentile(p),
            Aggregation::Avg => self.avg_ms,
            Aggregation::Med => self.med_ms,
            Aggregation::Max => self.max_ms,
            Aggregation::Rate => Some(self.error_rate),
            Aggregation::Count => Some(self.request_count as f64),
        }
    }
}

/// A threshold that did not hold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdViolation {
    pub metric: String,
    pub expression: String,
    pub actual: f64,
}

impl fmt::Display for ThresholdViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} crossed (observed {:.4})",
            self.metric, self.expression, self.actual
        )
    }
}

/// Outcome of evaluating every threshold of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed { violations: Vec<ThresholdViolation> },
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    pub fn violations(&self) -> &[ThresholdViolation] {
        match self {
            Self::Passed => &[],
            Self::Failed { violations } => violations,
        }
    }
}

/// Evaluate all thresholds. An empty set always passes.
pub fn evaluate(thresholds: &[Threshold], inputs: &ThresholdInputs) -> Verdict {
    let violations: Vec<ThresholdViolation> =
        thresholds.iter().filter_map(|t| t.check(inputs)).collect();
    if violations.is_empty() {
        Verdict::Passed
    } else {
        Verdict::Failed { violations }
    }
}

/// Parse a list of expressions, failing on the first malformed one.
pub fn parse_all<S: AsRef<str>>(expressions: &[S]) -> EngineResult<Vec<Threshold>> {
    expressions
        .iter()
        .map(|e| Threshold::parse(e.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> ThresholdInputs {
        ThresholdInputs {
            avg_ms: Some(80.0),
            med_ms: Some(60.0),
            max_ms: Some(2400.0),
            error_rate: 0.02,
            request_count: 1200,
            ..Default::default()
        }
        .with_percentile(95.0, 450.0)
        .with_percentile(99.0, 1100.0)
    }

    #[test]
    fn test_parse_expressions() {
        let t = Threshold::parse("p(99)<1000").unwrap();
        assert_eq!(t.aggregation(), Aggregation::Percentile(99.0));
        assert_eq!(t.limit(), 1000.0);
        assert_eq!(t.metric(), ThresholdMetric::Latency);

        let t = Threshold::parse(" rate <= 0.05 ").unwrap();
        assert_eq!(t.aggregation(), Aggregation::Rate);
        assert_eq!(t.expression(), "rate <= 0.05");

        let t = Threshold::parse("count>0").unwrap();
        assert_eq!(t.metric(), ThresholdMetric::RequestCount);

        assert_eq!(
            Threshold::parse("p(99.9)>=5").unwrap().aggregation(),
            Aggregation::Percentile(99.9)
        );
    }

    #[test]
    fn test_malformed_expressions() {
        for bad in ["", "p99<1000", "p(0)<5", "p(101)<5", "avg=5", "avg<fast", "min<3", "rate<"] {
            let err = Threshold::parse(bad).unwrap_err();
            assert!(
                matches!(err, EngineError::InvalidThreshold { .. }),
                "{} parsed",
                bad
            );
        }
    }

    #[test]
    fn test_evaluate_reports_each_violation() {
        let thresholds =
            parse_all(&["p(99)<1000", "p(95)<500", "rate<0.05", "count>0", "max<3000"]).unwrap();

        let verdict = evaluate(&thresholds, &inputs());

        assert!(!verdict.passed());
        assert_eq!(verdict.violations().len(), 1);
        assert_eq!(verdict.violations()[0].expression, "p(99)<1000");
        assert_eq!(verdict.violations()[0].metric, "http_req_duration");
        assert_eq!(verdict.violations()[0].actual, 1100.0);
    }

    #[test]
    fn test_operator_boundaries() {
        let i = inputs();
        assert!(Threshold::parse("avg<=80").unwrap().check(&i).is_none());
        assert!(Threshold::parse("avg<80").unwrap().check(&i).is_some());
        assert!(Threshold::parse("count>=1200").unwrap().check(&i).is_none());
        assert!(Threshold::parse("count>1200").unwrap().check(&i).is_some());
    }

    #[test]
    fn test_empty_run_fails_only_on_count() {
        let overall = OverallMetrics::default();
        let i = ThresholdInputs::from_overall(&overall);
        let thresholds = parse_all(&["p(99)<1000", "rate<0.05", "count>0"]).unwrap();

        let verdict = evaluate(&thresholds, &i);

        assert_eq!(verdict.violations().len(), 1);
        assert_eq!(verdict.violations()[0].expression, "count>0");
        assert!(evaluate(&[], &i).passed());
    }

    #[test]
    fn test_external_percentile_overrides() {
        let i = inputs().with_percentile(99.0, 900.0);
        assert!(Threshold::parse("p(99)<1000").unwrap().check(&i).is_none());
    }

    #[test]
    fn test_serde_as_string() {
        let t: Vec<Threshold> = serde_json::from_str(r#"["p(95)<500", "rate<0.1"]"#).unwrap();
        assert_eq!(serde_json::to_string(&t).unwrap(), r#"["p(95)<500","rate<0.1"]"#);
        assert!(serde_json::from_str::<Vec<Threshold>>(r#"["fast"]"#).is_err());
    }
}
