use promql_parser::parser::{self, Expr};
use serde::Serialize;

/// Direction of a threshold: the side of the level on which the alert fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Operator {
    #[serde(rename = "<")]
    Less,
    #[serde(rename = ">")]
    Greater,
}

impl Operator {
    /// Maps a PromQL binary operator to a chart direction.
    ///
    /// Returns `None` for operators that never produce a chart. Comparisons
    /// without a direction (`==`, `!=`) fall back to `>`.
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "<" | "<=" => Some(Self::Less),
            ">" | ">=" => Some(Self::Greater),
            "==" | "!=" => {
                tracing::debug!(op = token, "Comparison without direction, assuming >");
                Some(Self::Greater)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Less => write!(f, "<"),
            Self::Greater => write!(f, ">"),
        }
    }
}

/// One threshold comparison taken from an alerting expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotExpr {
    pub formula: String,
    pub operator: Operator,
    pub level: f64,
}

impl std::fmt::Display for PlotExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {:.2}", self.formula, self.operator, self.level)
    }
}

/// Decomposes an alerting expression into chartable threshold comparisons.
///
/// `a > 5 and b < 3` yields two comparisons. An expression that does not
/// parse, or contains no comparison, yields nothing.
///
/// # Examples
///
/// ```
/// use alertpush_plot::{decompose, Operator};
///
/// let plots = decompose("(node_load1 >= 10)");
/// assert_eq!(plots.len(), 1);
/// assert_eq!(plots[0].formula, "node_load1");
/// assert_eq!(plots[0].operator, Operator::Greater);
/// assert_eq!(plots[0].to_string(), "node_load1 > 10.00");
/// ```
pub fn decompose(query: &str) -> Vec<PlotExpr> {
    match parser::parse(query) {
        Ok(expr) => {
            let mut plots = Vec::new();
            collect(&expr, &mut plots);
            plots
        }
        Err(e) => {
            tracing::debug!(query, error = %e, "Alert expression does not parse, skipping charts");
            Vec::new()
        }
    }
}

fn collect(expr: &Expr, plots: &mut Vec<PlotExpr>) {
    match expr {
        Expr::Paren(paren) => collect(&paren.expr, plots),
        Expr::Binary(binary) => {
            let op = binary.op.to_string();
            if op == "and" {
                collect(&binary.lhs, plots);
                collect(&binary.rhs, plots);
                return;
            }
            match Operator::from_token(&op) {
                Some(operator) => plots.push(PlotExpr {
                    formula: binary.lhs.to_string(),
                    operator,
                    level: level_of(&binary.rhs),
                }),
                None => tracing::debug!(op = %op, "Operator is not a threshold, skipping"),
            }
        }
        _ => tracing::debug!(expr = %expr, "Not a binary expression, skipping"),
    }
}

/// The numeric right-hand side of a comparison, or `0` when it is not a number.
fn level_of(expr: &Expr) -> f64 {
    match expr {
        Expr::NumberLiteral(n) => n.val,
        Expr::Paren(paren) => level_of(&paren.expr),
        other => other.to_string().trim().parse().unwrap_or(0.0),
    }
}
