use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::normalize::CanonicalPageRecord;

const FRACTIONS: &str = "½⅓⅔¼¾⅛⅜⅝⅞";

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static NUMERIC_ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|\d+);").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?)?$").unwrap()
});
static QUANTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    let num = format!(r"(?:\d+\s+\d+/\d+|\d+/\d+|\d+(?:[.,]\d+)?\s*[{FRACTIONS}]?|[{FRACTIONS}])");
    Regex::new(&format!(r"^({num}(?:\s*(?:-|–|to)\s*{num})?)\s*(.*)$")).unwrap()
});
static PAREN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(([^)]*)\)").unwrap());

/// Known measurement words → canonical singular form.
const UNITS: &[(&str, &str)] = &[
    ("cup", "cup"), ("cups", "cup"),
    ("tablespoon", "tablespoon"), ("tablespoons", "tablespoon"), ("tbsp", "tablespoon"), ("tbs", "tablespoon"),
    ("teaspoon", "teaspoon"), ("teaspoons", "teaspoon"), ("tsp", "teaspoon"),
    ("g", "g"), ("gram", "g"), ("grams", "g"), ("kg", "kg"), ("kilogram", "kg"), ("kilograms", "kg"),
    ("ml", "ml"), ("milliliter", "ml"), ("milliliters", "ml"), ("millilitre", "ml"), ("millilitres", "ml"),
    ("l", "l"), ("liter", "l"), ("liters", "l"), ("litre", "l"), ("litres", "l"),
    ("oz", "oz"), ("ounce", "oz"), ("ounces", "oz"),
    ("lb", "lb"), ("lbs", "lb"), ("pound", "lb"), ("pounds", "lb"),
    ("pinch", "pinch"), ("pinches", "pinch"), ("dash", "dash"), ("dashes", "dash"),
    ("clove", "clove"), ("cloves", "clove"), ("can", "can"), ("cans", "can"),
    ("slice", "slice"), ("slices", "slice"), ("stick", "stick"), ("sticks", "stick"),
    ("handful", "handful"), ("handfuls", "handful"), ("bunch", "bunch"), ("bunches", "bunch"),
    ("package", "package"), ("packages", "package"), ("pkg", "package"),
];

/// One ingredient line of a recipe, split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepIngredient {
    pub position: usize,
    pub name: String,
    pub quantity: Option<String>,
    pub measurement: Option<String>,
    pub notes: Option<String>,
    pub raw: String,
}

/// A recipe ready to be written to the store.
#[derive(Debug, Clone, Default)]
pub struct NewRecipe {
    pub url: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub author: Option<String>,
    pub prep_minutes: Option<u32>,
    pub cook_minutes: Option<u32>,
    pub total_minutes: Option<u32>,
    pub yield_text: Option<String>,
    pub category: Option<String>,
    pub cuisine: Option<String>,
    pub site_name: Option<String>,
    pub steps: Vec<String>,
    pub ingredients: Vec<StepIngredient>,
}

impl NewRecipe {
    /// `None` when the record carries no recipe.
    pub fn from_record(record: &CanonicalPageRecord, page_url: &Url) -> Option<Self> {
        let recipe = record.recipe.as_ref()?;

        let author = recipe
            .author
            .iter()
            .find_map(|a| a.name.clone())
            .or_else(|| record.person.as_ref().and_then(|p| p.name.clone()));
        let site_name = record
            .website
            .as_ref()
            .and_then(|w| w.name.clone())
            .or_else(|| record.organization.as_ref().and_then(|o| o.name.clone()));
        let join = |items: &[String]| (!items.is_empty()).then(|| items.join(", "));

        let ingredients = recipe
            .recipe_ingredient
            .iter()
            .enumerate()
            .filter_map(|(i, line)| parse_ingredient_line(line, i))
            .collect();
        let steps = recipe
            .recipe_instructions
            .iter()
            .map(|s| clean_text(s))
            .filter(|s| !s.is_empty())
            .collect();

        Some(NewRecipe {
            url: page_url.to_string(),
            name: recipe.name.as_deref().map(clean_text),
            description: recipe.description.as_deref().map(clean_text),
            image_url: record.image_url.as_ref().map(Url::to_string),
            author,
            prep_minutes: recipe.prep_time.as_deref().and_then(parse_iso_duration),
            cook_minutes: recipe.cook_time.as_deref().and_then(parse_iso_duration),
            total_minutes: recipe.total_time.as_deref().and_then(parse_iso_duration),
            yield_text: recipe.recipe_yield.clone(),
            category: join(&recipe.recipe_category),
            cuisine: join(&recipe.recipe_cuisine),
            site_name,
            steps,
            ingredients,
        })
    }
}

/// ISO-8601 duration (`PT1H30M`, `P1DT2H`) in whole minutes.
pub fn parse_iso_duration(s: &str) -> Option<u32> {
    let caps = DURATION_RE.captures(s.trim())?;
    if (1..=4).all(|i| caps.get(i).is_none()) {
        return None;
    }
    let int = |i: usize| -> Option<u64> {
        caps.get(i).map_or(Some(0), |m| m.as_str().parse().ok())
    };
    let secs: f64 = caps
        .get(4)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0);
    let minutes = int(1)?
        .checked_mul(1440)?
        .checked_add(int(2)?.checked_mul(60)?)?
        .checked_add(int(3)?)?
        .checked_add((secs / 60.0).round() as u64)?;
    u32::try_from(minutes).ok()
}

/// Strip markup, decode entities, collapse whitespace.
pub fn clean_text(s: &str) -> String {
    let no_tags = TAG_RE.replace_all(s, " ");
    let decoded = decode_entities(&no_tags);
    WS_RE.replace_all(&decoded, " ").trim().to_string()
}

fn decode_entities(s: &str) -> String {
    let named = s
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&rsquo;", "’")
        .replace("&frac12;", "½")
        .replace("&frac14;", "¼")
        .replace("&frac34;", "¾");
    let numeric = NUMERIC_ENTITY_RE.replace_all(&named, |caps: &regex::Captures| {
        let code = &caps[1];
        let n = match code.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse().ok(),
        };
        n.and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });
    numeric.replace("&amp;", "&")
}

/// Split "2 1/2 cups flour (sifted), divided" into quantity, unit, name and
/// notes. Lines that leave no name are dropped.
pub fn parse_ingredient_line(line: &str, position: usize) -> Option<StepIngredient> {
    let raw = clean_text(line);
    if raw.is_empty() {
        return None;
    }

    let (quantity, rest) = match QUANTITY_RE.captures(&raw) {
        Some(caps) => (Some(caps[1].trim().to_string()), caps[2].to_string()),
        None => (None, raw.clone()),
    };

    let mut notes: Vec<String> = PAREN_RE
        .captures_iter(&rest)
        .map(|c| c[1].trim().to_string())
        .filter(|n| !n.is_empty())
        .collect();
    let rest = PAREN_RE.replace_all(&rest, " ");
    let rest = WS_RE.replace_all(&rest, " ").trim().to_string();

    let (measurement, rest) = split_unit(&rest);

    let (name, trailing) = match rest.split_once(',') {
        Some((name, tail)) => (name.trim().to_string(), Some(tail.trim().to_string())),
        None => (rest.trim().to_string(), None),
    };
    notes.extend(trailing.filter(|t| !t.is_empty()));

    let name = name
        .strip_prefix("of ")
        .unwrap_or(&name)
        .trim()
        .to_string();
    if name.is_empty() {
        return None;
    }

    Some(StepIngredient {
        position,
        name,
        quantity,
        measurement,
        notes: (!notes.is_empty()).then(|| notes.join("; ")),
        raw,
    })
}

fn split_unit(rest: &str) -> (Option<String>, String) {
    let Some((first, tail)) = rest.split_once(' ') else {
        return (None, rest.to_string());
    };
    let word = first.trim_end_matches('.').to_lowercase();
    match UNITS.iter().find(|(w, _)| *w == word) {
        Some((_, unit)) if !tail.trim().is_empty() => (Some(unit.to_string()), tail.trim().to_string()),
        _ => (None, rest.to_string()),
    }
}
