use scraper::{Html, Selector};

use crate::config::TRUSTED_IMAGE_HOST;
use crate::types::{Offer, WearCondition};

/// Extract offers from a listing page.
///
/// Lenient: cards without a recognizable price are skipped, every
/// other field degrades per-card, and markup the selectors don't recognize
/// at all yields an empty list. html5ever accepts any byte soup, so there is
/// no "unparsable page" error path — callers must tolerate empty results.
pub fn parse_offers(html: &str) -> Vec<Offer> {
    let document = Html::parse_document(html);
    let card_sel = Selector::parse("div.item-link.main.product-grid-layout").unwrap();
    let price_sel = Selector::parse("span.price").unwrap();
    let wear_sel = Selector::parse("div.wear-col div.exteriorName").unwrap();
    let img_sel = Selector::parse("img").unwrap();
    let sticker_sel = Selector::parse("div.sticker-col img").unwrap();

    let mut offers = Vec::new();

    for (i, card) in document.select(&card_sel).enumerate() {
        let position = i + 1;

        let Some(price_node) = card.select(&price_sel).next() else {
            continue;
        };
        let raw = price_node.text().collect::<String>();
        let Some(price) = normalize_price(&raw) else {
            continue;
        };

        let wear = card
            .select(&wear_sel)
            .next()
            .map(|n| WearCondition::from_css_classes(n.value().classes()))
            .unwrap_or(WearCondition::Unknown);

        let image_url = card
            .select(&img_sel)
            .next()
            .and_then(|img| img.value().attr("src"))
            .filter(|src| is_trusted_asset_url(src))
            .map(str::to_string);

        let stickers: Vec<String> = card
            .select(&sticker_sel)
            .filter_map(|img| img.value().attr("title"))
            .map(|t| t.trim_matches('"').to_string())
            .filter(|t| !t.is_empty())
            .collect();

        offers.push(Offer { position, price, wear, image_url, stickers });
    }

    offers
}

/// Normalize a scraped or user-supplied price: strip the currency symbol,
/// turn the decimal comma into a point, parse as f64.
pub fn normalize_price(raw: &str) -> Option<f64> {
    let cleaned = raw.replace('€', "").replace(',', ".");
    cleaned.trim().parse::<f64>().ok()
}

/// True when the URL's host is exactly the trusted CDN. Handles absolute,
/// protocol-relative, and bare-host forms; substring tricks in the path or
/// a prefixed host don't pass.
fn is_trusted_asset_url(src: &str) -> bool {
    let rest = src.splitn(2, "//").nth(1).unwrap_or(src);
    let host = rest.split('/').next().unwrap_or("");
    host.eq_ignore_ascii_case(TRUSTED_IMAGE_HOST)
}
