//! Deterministic substring classification of common grocery items,
//! English and Portuguese. Specific item rules first, then broader
//! category hints, then the generic catch-all.

use pantry_sync_store::Category;

use crate::{Classification, FALLBACK_ICON};

/// (substring needles, category, icon); first match wins.
const ITEM_RULES: &[(&[&str], Category, &str)] = &[
    (&["manteiga", "butter"], Category::Dairy, "🧈"),
    (&["queijo", "cheese"], Category::Dairy, "🧀"),
    (&["iogurte", "yogurt"], Category::Dairy, "🥣"),
    (&["leite", "milk"], Category::Dairy, "🥛"),
    (&["natas", "cream"], Category::Dairy, "🥛"),
    (&["ovos", "eggs"], Category::Dairy, "🥚"),
    (&["banana"], Category::Produce, "🍌"),
    (&["maçã", "apple"], Category::Produce, "🍎"),
    (&["uva", "grape"], Category::Produce, "🍇"),
    (&["cenoura", "carrot"], Category::Produce, "🥕"),
    (&["batata", "potato"], Category::Produce, "🥔"),
    (&["tomate", "tomato"], Category::Produce, "🍅"),
    (&["alface", "lettuce"], Category::Produce, "🥬"),
    (&["cebola", "onion"], Category::Produce, "🧅"),
    (&["alho", "garlic"], Category::Produce, "🧄"),
    (&["pão", "bread"], Category::Bakery, "🍞"),
    (&["croissant"], Category::Bakery, "🥐"),
    (&["baguette", "baguete"], Category::Bakery, "🥖"),
    (&["frango", "chicken"], Category::MeatAndSeafood, "🍗"),
    (&["bife", "steak", "vaca", "beef"], Category::MeatAndSeafood, "🥩"),
    (&["peixe", "fish"], Category::MeatAndSeafood, "🐟"),
    (&["camarão", "shrimp"], Category::MeatAndSeafood, "🦐"),
    (&["arroz", "rice"], Category::Pantry, "🍚"),
    (&["massa", "pasta", "spaghetti"], Category::Pantry, "🍝"),
    (&["azeite", "oil", "óleo"], Category::Pantry, "🫗"),
    (&["sal", "salt"], Category::Pantry, "🧂"),
    (&["água", "water"], Category::Beverages, "💧"),
    (&["café", "coffee"], Category::Beverages, "☕"),
    (&["cerveja", "beer"], Category::Beverages, "🍺"),
    (&["vinho", "wine"], Category::Beverages, "🍷"),
    (&["papel", "paper"], Category::Household, "🧻"),
    (&["detergente", "detergent", "sabão", "soap"], Category::Household, "🧼"),
];

/// Broader hints applied when no specific item matched.
const CATEGORY_HINTS: &[(&[&str], Category, &str)] = &[
    (
        &["leite", "milk", "queijo", "cheese", "iogurte", "yogurt", "manteiga", "butter", "creme", "cream", "ovos", "eggs"],
        Category::Dairy,
        "🥛",
    ),
    (&["fruta", "fruit", "vegetais", "veg", "legumes"], Category::Produce, "🥦"),
    (&["padaria", "bakery", "bolo", "cake"], Category::Bakery, "🥐"),
    (&["carne", "meat", "peixe", "fish"], Category::MeatAndSeafood, "🥩"),
    (&["bebidas", "drinks", "sumo", "juice"], Category::Beverages, "🧃"),
    (&["limpeza", "cleaning", "casa", "home"], Category::Household, "🧹"),
];

/// Classify an item name without any remote call.
pub fn fallback_classify(item_name: &str) -> Classification {
    let name = item_name.to_lowercase();

    for (needles, category, icon) in ITEM_RULES {
        if needles.iter().any(|needle| name.contains(needle)) {
            return Classification { category: *category, icon: (*icon).to_string() };
        }
    }

    for (needles, category, icon) in CATEGORY_HINTS {
        if needles.iter().any(|needle| name.contains(needle)) {
            return Classification { category: *category, icon: (*icon).to_string() };
        }
    }

    Classification { category: Category::Other, icon: FALLBACK_ICON.to_string() }
}
