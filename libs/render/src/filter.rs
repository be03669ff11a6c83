//! Boolean item filters.
//!
//! A filter is the body of a template action, e.g. `lt .attributes.price 400`.
//! An item is dropped only when a filter renders to an explicit false value.
//! Filters that fail to render, or render to something that is not a boolean,
//! keep the item.

use leasewatch_snapshot::Item;

use crate::Renderer;

/// Apply `filters` to `items`, keeping order.
pub fn filter_items(renderer: &dyn Renderer, items: &[Item], filters: &[String]) -> Vec<Item> {
    if filters.is_empty() {
        return items.to_vec();
    }

    let templates: Vec<String> = filters.iter().map(|f| format!("{{{{{f}}}}}")).collect();

    items
        .iter()
        .filter(|item| {
            let data = match serde_json::to_value(item) {
                Ok(data) => data,
                Err(_) => return true,
            };
            templates.iter().all(|template| {
                renderer
                    .render(template, &data)
                    .ok()
                    .and_then(|out| parse_bool(out.trim()))
                    .unwrap_or(true)
            })
        })
        .cloned()
        .collect()
}

/// Parse the boolean spellings accepted by filters.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TemplateEngine;
    use leasewatch_id::ItemId;
    use rstest::rstest;
    use serde_json::json;

    fn car(id: &str, price: u32, fuel: &str) -> Item {
        Item::new(
            ItemId::new(id).unwrap(),
            json!({"price": price, "fuel": fuel}),
        )
    }

    fn ids(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_no_filters_keeps_everything() {
        let items = vec![car("a", 300, "petrol")];
        assert_eq!(filter_items(&TemplateEngine, &items, &[]), items);
    }

    #[test]
    fn test_all_filters_must_pass() {
        let items = vec![
            car("a", 300, "petrol"),
            car("b", 500, "petrol"),
            car("c", 350, "electric"),
        ];
        let filters = vec![
            "lt .attributes.price 400".to_string(),
            "eq .attributes.fuel \"electric\"".to_string(),
        ];
        let kept = filter_items(&TemplateEngine, &items, &filters);
        assert_eq!(ids(&kept), vec!["c"]);
    }

    #[test]
    fn test_broken_filter_keeps_items() {
        let items = vec![car("a", 300, "petrol")];
        let filters = vec!["nosuchfunc .attributes".to_string(), ".attributes.fuel".to_string()];
        assert_eq!(filter_items(&TemplateEngine, &items, &filters).len(), 1);
    }

    #[test]
    fn test_filter_on_identity() {
        let items = vec![car("keep", 1, "x"), car("drop", 1, "x")];
        let filters = vec!["ne .id \"drop\"".to_string()];
        assert_eq!(ids(&filter_items(&TemplateEngine, &items, &filters)), vec!["keep"]);
    }

    #[rstest]
    #[case("true", Some(true))]
    #[case("T", Some(true))]
    #[case("1", Some(true))]
    #[case("False", Some(false))]
    #[case("0", Some(false))]
    #[case("yes", None)]
    #[case("", None)]
    fn test_parse_bool(#[case] input: &str, #[case] expected: Option<bool>) {
        assert_eq!(parse_bool(input), expected);
    }
}
