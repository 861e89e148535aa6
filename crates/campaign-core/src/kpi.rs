//! KPI forecast arithmetic.
//!
//! A campaign's expected leads determine its funnel forecast:
//!
//! | Stage | Rule |
//! |-------|------|
//! | MQL | 10% of leads |
//! | SQL | 6% of leads |
//! | Opportunities | 80% of SQL |
//! | Pipeline | $50,000 per opportunity |
//!
//! All arithmetic is [`Decimal`]; counts are rounded to whole numbers, half
//! away from zero, before feeding the next stage.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Record field holding the expected lead count.
pub const EXPECTED_LEADS_FIELD: &str = "expectedLeads";

/// Record field receiving the MQL forecast.
pub const MQL_FIELD: &str = "mqlForecast";

/// Record field receiving the SQL forecast.
pub const SQL_FIELD: &str = "sqlForecast";

/// Record field receiving the opportunity forecast.
pub const OPPORTUNITIES_FIELD: &str = "oppsForecast";

/// Record field receiving the pipeline forecast.
pub const PIPELINE_FIELD: &str = "pipelineForecast";

/// Share of leads that become marketing-qualified (10%).
const MQL_RATE: Decimal = Decimal::from_parts(10, 0, 0, false, 2);

/// Share of leads that become sales-qualified (6%).
const SQL_RATE: Decimal = Decimal::from_parts(6, 0, 0, false, 2);

/// Share of SQLs that become opportunities (80%).
const OPPORTUNITY_RATE: Decimal = Decimal::from_parts(80, 0, 0, false, 2);

/// Revenue attributed to one opportunity, in dollars.
const PIPELINE_PER_OPPORTUNITY: Decimal = Decimal::from_parts(50_000, 0, 0, false, 0);

/// Errors from forecast arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KpiError {
    /// The lead count is too large to forecast.
    #[error("arithmetic overflow forecasting {leads} leads")]
    ArithmeticOverflow {
        /// The offending lead count.
        leads: Decimal,
    },
}

/// Funnel forecast for one campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KpiForecast {
    /// Marketing-qualified leads.
    pub mql: Decimal,
    /// Sales-qualified leads.
    pub sql: Decimal,
    /// Opportunities.
    pub opportunities: Decimal,
    /// Pipeline value in dollars.
    pub pipeline: Decimal,
}

impl KpiForecast {
    /// The forecast as record fields, ready to merge into an update.
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert(MQL_FIELD.to_owned(), decimal_value(self.mql));
        fields.insert(SQL_FIELD.to_owned(), decimal_value(self.sql));
        fields.insert(OPPORTUNITIES_FIELD.to_owned(), decimal_value(self.opportunities));
        fields.insert(PIPELINE_FIELD.to_owned(), decimal_value(self.pipeline));
        fields
    }
}

fn whole(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

fn decimal_value(value: Decimal) -> Value {
    value
        .to_i64()
        .map_or_else(|| Value::String(value.to_string()), Value::from)
}

/// Forecast the funnel for `leads` expected leads.
///
/// Negative lead counts forecast as zero.
///
/// # Errors
///
/// Returns [`KpiError::ArithmeticOverflow`] if a stage overflows.
pub fn forecast(leads: Decimal) -> Result<KpiForecast, KpiError> {
    let overflow = || KpiError::ArithmeticOverflow { leads };
    let leads = leads.max(Decimal::ZERO);

    let mql = whole(leads.checked_mul(MQL_RATE).ok_or_else(overflow)?);
    let sql = whole(leads.checked_mul(SQL_RATE).ok_or_else(overflow)?);
    let opportunities = whole(sql.checked_mul(OPPORTUNITY_RATE).ok_or_else(overflow)?);
    let pipeline = opportunities
        .checked_mul(PIPELINE_PER_OPPORTUNITY)
        .ok_or_else(overflow)?;

    Ok(KpiForecast {
        mql,
        sql,
        opportunities,
        pipeline,
    })
}

/// Read a lead count from a record value.
///
/// Accepts numbers and numeric strings (surrounding whitespace ignored).
pub fn leads_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rates_match_the_funnel() {
        let kpi = forecast(Decimal::from(1000)).unwrap();
        assert_eq!(kpi.mql, Decimal::from(100));
        assert_eq!(kpi.sql, Decimal::from(60));
        assert_eq!(kpi.opportunities, Decimal::from(48));
        assert_eq!(kpi.pipeline, Decimal::from(2_400_000));
    }

    #[test]
    fn counts_round_half_away_from_zero() {
        // 25 leads: mql 2.5 -> 3, sql 1.5 -> 2, opps 1.6 -> 2.
        let kpi = forecast(Decimal::from(25)).unwrap();
        assert_eq!(kpi.mql, Decimal::from(3));
        assert_eq!(kpi.sql, Decimal::from(2));
        assert_eq!(kpi.opportunities, Decimal::from(2));
        assert_eq!(kpi.pipeline, Decimal::from(100_000));
    }

    #[test]
    fn zero_and_negative_leads_forecast_nothing() {
        for leads in [Decimal::ZERO, Decimal::from(-40)] {
            let kpi = forecast(leads).unwrap();
            assert_eq!(kpi.pipeline, Decimal::ZERO);
            assert_eq!(kpi.mql, Decimal::ZERO);
        }
    }

    #[test]
    fn overflow_is_an_error() {
        assert!(matches!(
            forecast(Decimal::MAX),
            Err(KpiError::ArithmeticOverflow { .. })
        ));
    }

    #[test]
    fn fields_are_whole_numbers() {
        let fields = forecast(Decimal::from(500)).unwrap().to_fields();
        assert_eq!(fields.get(MQL_FIELD), Some(&json!(50)));
        assert_eq!(fields.get(SQL_FIELD), Some(&json!(30)));
        assert_eq!(fields.get(OPPORTUNITIES_FIELD), Some(&json!(24)));
        assert_eq!(fields.get(PIPELINE_FIELD), Some(&json!(1_200_000)));
    }

    #[test]
    fn leads_parse_from_numbers_and_strings() {
        assert_eq!(leads_from_value(&json!(120)), Some(Decimal::from(120)));
        assert_eq!(leads_from_value(&json!(" 75 ")), Some(Decimal::from(75)));
        assert_eq!(leads_from_value(&json!("many")), None);
        assert_eq!(leads_from_value(&Value::Null), None);
    }
}
