use std::collections::HashSet;

use chrono::NaiveDate;

use crate::domain::subscriber::Subscriber;

/// Per-stock content for one subscriber's digest. `stock_id` is the natural
/// key; predicted prices are ordered chronologically, one per future trading
/// day.
#[derive(Debug, Clone)]
pub struct StockReportFragment {
    pub stock_id: String,
    pub closing_price: i64,
    pub predicted_prices: Vec<i64>,
}

/// Renders one HTML digest by literal placeholder substitution. The template
/// is loaded once per run and shared read-only across every concurrent
/// composition, and `compose` is a pure function of its inputs.
pub struct DigestComposer {
    template: String,
    chart_base_url: String,
}

impl DigestComposer {
    pub fn new(template: String, chart_base_url: String) -> DigestComposer {
        DigestComposer {
            template,
            chart_base_url,
        }
    }

    pub fn compose(
        &self,
        subscriber: &Subscriber,
        fragments: &[StockReportFragment],
        predict_date: NaiveDate,
    ) -> String {
        self.template
            .replace("%email%", &subscriber.email)
            .replace("%token%", &subscriber.token())
            .replace(
                "%predictdate%",
                &predict_date.format("%A, %B %e, %Y").to_string(),
            )
            .replace("%chart%", &self.render_charts(fragments))
    }

    /// One block per fragment, deduplicated by stock id: first occurrence
    /// wins and the remaining order is preserved.
    fn render_charts(&self, fragments: &[StockReportFragment]) -> String {
        let mut seen = HashSet::new();
        let mut blocks = String::new();

        for fragment in fragments {
            if !seen.insert(fragment.stock_id.as_str()) {
                continue;
            }

            let predicted = fragment
                .predicted_prices
                .iter()
                .map(|price| price.to_string())
                .collect::<Vec<String>>()
                .join(", ");

            blocks.push_str(&format!(
                r#"<tr><td><img src="{base}/{id}.png" alt="{id}"/><p>Today's closing price: {price}</p><p>Predicted: {predicted}</p></td></tr> "#,
                base = self.chart_base_url,
                id = fragment.stock_id,
                price = fragment.closing_price,
                predicted = predicted,
            ));
        }

        blocks
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{DigestComposer, StockReportFragment};
    use crate::domain::subscriber::Subscriber;
    use crate::domain::subscriber_email::SubscriberEmail;

    const TEMPLATE: &str =
        "<html><p>%email%</p><p>%token%</p><p>%predictdate%</p><table>%chart%</table></html>";

    fn composer() -> DigestComposer {
        DigestComposer::new(TEMPLATE.to_string(), "https://charts.test".to_string())
    }

    fn subscriber() -> Subscriber {
        Subscriber::new(SubscriberEmail::parse("frank@test.com".to_string()).unwrap())
    }

    fn fragment(stock_id: &str, closing_price: i64) -> StockReportFragment {
        StockReportFragment {
            stock_id: stock_id.to_string(),
            closing_price,
            predicted_prices: vec![closing_price + 1, closing_price + 2],
        }
    }

    fn predict_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 8, 1).unwrap()
    }

    #[test]
    fn compose_substitutes_every_placeholder() {
        let subscriber = subscriber();
        let body = composer().compose(&subscriber, &[fragment("005930", 70000)], predict_date());

        assert!(body.contains("frank@test.com"));
        assert!(body.contains(&subscriber.token()));
        assert!(body.contains("Tuesday, August  1, 2023"));
        assert!(body.contains(r#"<img src="https://charts.test/005930.png" alt="005930"/>"#));
        assert!(body.contains("Today's closing price: 70000"));
        assert!(body.contains("Predicted: 70001, 70002"));
        assert!(!body.contains('%'));
    }

    #[test]
    fn duplicate_stocks_render_once_keeping_first_occurrence_order() {
        let fragments = vec![fragment("A", 100), fragment("A", 999), fragment("B", 200)];

        let body = composer().compose(&subscriber(), &fragments, predict_date());

        assert_eq!(body.matches(r#"alt="A""#).count(), 1);
        assert_eq!(body.matches(r#"alt="B""#).count(), 1);
        // First "A" wins over the later duplicate.
        assert!(body.contains("Today's closing price: 100"));
        assert!(!body.contains("Today's closing price: 999"));
        assert!(body.find(r#"alt="A""#).unwrap() < body.find(r#"alt="B""#).unwrap());
    }

    #[test]
    fn compose_is_idempotent() {
        let subscriber = subscriber();
        let fragments = vec![fragment("A", 100), fragment("B", 200)];
        let composer = composer();

        let first = composer.compose(&subscriber, &fragments, predict_date());
        let second = composer.compose(&subscriber, &fragments, predict_date());

        assert_eq!(first, second);
    }

    #[test]
    fn zero_fragments_render_an_empty_chart_section() {
        let body = composer().compose(&subscriber(), &[], predict_date());

        assert!(body.contains("<table></table>"));
        assert!(body.contains("frank@test.com"));
    }

    #[test]
    fn fragment_without_predictions_still_renders() {
        let fragments = vec![StockReportFragment {
            stock_id: "005930".to_string(),
            closing_price: 70000,
            predicted_prices: Vec::new(),
        }];

        let body = composer().compose(&subscriber(), &fragments, predict_date());

        assert!(body.contains("Predicted: </p>"));
    }
}
