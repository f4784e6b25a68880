//! The tuple handed to the external chart widget.

use crate::app_config::{AppConfig, ChartScale, Theme, Timeframe};
use marketdeck_core::data::RankedItem;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    #[default]
    Price,
    MarketCap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartSpec {
    pub symbol: String,
    pub interval: Timeframe,
    pub scale: ChartScale,
    pub theme: Theme,
    /// True only while the chart's region is on screen.
    pub visible: bool,
}

impl ChartSpec {
    pub fn for_item(item: &RankedItem, config: &AppConfig, kind: ChartKind, visible: bool) -> Self {
        Self {
            symbol: chart_symbol(item, kind),
            interval: config.timeframe,
            scale: config.chart_scale,
            theme: config.theme,
            visible,
        }
    }
}

/// Widget symbol: an explicit `tv_symbol` wins for price charts; otherwise
/// `<SYMBOL>USDT`, or `CRYPTOCAP:<SYMBOL>` for market-cap charts.
pub fn chart_symbol(item: &RankedItem, kind: ChartKind) -> String {
    let symbol = item.symbol.to_uppercase();
    match kind {
        ChartKind::MarketCap => format!("CRYPTOCAP:{symbol}"),
        ChartKind::Price => match item.text("tv_symbol") {
            Some(tv) if !tv.is_empty() => tv.to_string(),
            _ => format!("{symbol}USDT"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn price_symbol_defaults_to_usdt_pair() {
        let btc = RankedItem::new("bitcoin", 1).with_symbol("btc", "Bitcoin");
        let mut config = AppConfig::default();
        config.set_theme(Theme::Dark);

        let spec = ChartSpec::for_item(&btc, &config, ChartKind::Price, true);

        assert_eq!(spec.symbol, "BTCUSDT");
        assert_eq!(spec.interval, Timeframe::Month);
        assert_eq!(spec.scale, ChartScale::Log);
        assert_eq!(spec.theme, Theme::Dark);
        assert!(spec.visible);
    }

    #[test]
    fn tv_symbol_overrides_price_symbol() {
        let mut spx = RankedItem::new("spx", 1).with_symbol("spx", "S&P 500");
        spx.payload.insert("tv_symbol".into(), Value::from("SP:SPX"));

        assert_eq!(chart_symbol(&spx, ChartKind::Price), "SP:SPX");
        assert_eq!(chart_symbol(&spx, ChartKind::MarketCap), "CRYPTOCAP:SPX");
    }

    #[test]
    fn serializes_widget_codes() {
        let eth = RankedItem::new("ethereum", 2).with_symbol("eth", "Ethereum");
        let spec = ChartSpec::for_item(&eth, &AppConfig::default(), ChartKind::Price, false);
        let v = serde_json::to_value(&spec).unwrap();
        assert_eq!(v["interval"], "M");
        assert_eq!(v["scale"], "log");
        assert_eq!(v["theme"], "light");
    }
}
