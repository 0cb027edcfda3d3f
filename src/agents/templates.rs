//! Deterministic content for the offline stage variants.
//!
//! The offline narrative and schema agree on one small commerce-shaped model
//! (`customers`, `products`, `orders`) so that offline golden queries always
//! validate against the offline warehouse.

use super::types::{CompanyResearch, GoldenQuery, Persona, Storyline};
use crate::warehouse::{ColumnSpec, ColumnType, DataModel, TableSpec};

const CUSTOMER_NAMES: [&str; 12] = [
    "Avery Chen",
    "Jordan Patel",
    "Sam Okafor",
    "Riley Novak",
    "Morgan Silva",
    "Casey Lindqvist",
    "Quinn Moreau",
    "Taylor Haddad",
    "Jamie Kowalski",
    "Rowan Ito",
    "Drew Castillo",
    "Alex Brennan",
];

const REGIONS: [&str; 4] = ["North America", "Europe", "APAC", "LATAM"];

const CHANNELS: [&str; 4] = ["web", "mobile", "partner", "in_store"];

pub fn storyline(research: &CompanyResearch) -> Storyline {
    let lead = research
        .offerings
        .first()
        .cloned()
        .unwrap_or_else(|| "its products".to_string());
    Storyline {
        title: format!("{} growth analytics", research.company_name),
        summary: format!(
            "{} wants to understand which customers, regions and channels drive demand for {}. \
             The demo follows the commercial team as they explore revenue, product mix and \
             order trends in the new warehouse.",
            research.company_name, lead
        ),
        business_questions: golden_queries(research)
            .into_iter()
            .map(|q| q.question)
            .collect(),
    }
}

pub fn personas(research: &CompanyResearch) -> Vec<Persona> {
    vec![
        Persona {
            name: "Dana".to_string(),
            role: format!("VP of Sales, {}", research.company_name),
            goals: vec![
                "See which regions are ahead of plan".to_string(),
                "Find the segments worth more investment".to_string(),
            ],
        },
        Persona {
            name: "Lee".to_string(),
            role: "Product Marketing Manager".to_string(),
            goals: vec![
                "Know which offerings sell best".to_string(),
                "Track demand month over month".to_string(),
            ],
        },
    ]
}

pub fn golden_queries(research: &CompanyResearch) -> Vec<GoldenQuery> {
    let noun = research
        .offerings
        .first()
        .map(|o| o.to_lowercase())
        .unwrap_or_else(|| "products".to_string());
    vec![
        GoldenQuery {
            question: "Which regions generate the most revenue?".to_string(),
            sql: "SELECT c.region, SUM(o.amount) AS revenue FROM orders o \
                  JOIN customers c ON o.customer_id = c.customer_id \
                  GROUP BY c.region ORDER BY revenue DESC"
                .to_string(),
        },
        GoldenQuery {
            question: format!("Which {} sell the most units?", noun),
            sql: "SELECT p.name, SUM(o.quantity) AS units FROM orders o \
                  JOIN products p ON o.product_id = p.product_id \
                  GROUP BY p.name ORDER BY units DESC LIMIT 5"
                .to_string(),
        },
        GoldenQuery {
            question: "How is monthly order volume trending?".to_string(),
            sql: "SELECT DATE_TRUNC('month', o.ordered_at) AS month, COUNT(*) AS orders \
                  FROM orders o GROUP BY 1 ORDER BY 1"
                .to_string(),
        },
        GoldenQuery {
            question: "Which customer segments have the highest average order value?"
                .to_string(),
            sql: "SELECT c.segment, AVG(o.amount) AS avg_order_value FROM orders o \
                  JOIN customers c ON o.customer_id = c.customer_id \
                  GROUP BY c.segment ORDER BY avg_order_value DESC"
                .to_string(),
        },
    ]
}

pub fn data_model(research: &CompanyResearch) -> DataModel {
    let segments = if research.audience.is_empty() {
        vec!["Enterprise".to_string(), "SMB".to_string(), "Consumer".to_string()]
    } else {
        research.audience.clone()
    };
    let products = if research.offerings.is_empty() {
        vec!["Standard plan".to_string(), "Premium plan".to_string()]
    } else {
        research.offerings.clone()
    };
    let terms = if research.key_terms.is_empty() {
        vec!["featured".to_string(), "new".to_string(), "bestseller".to_string()]
    } else {
        research.key_terms.clone()
    };

    DataModel {
        tables: vec![
            TableSpec {
                name: "customers".to_string(),
                description: format!("People and organizations buying from {}", research.company_name),
                columns: vec![
                    ColumnSpec::new("customer_id", ColumnType::Integer),
                    ColumnSpec::new("name", ColumnType::String).samples(CUSTOMER_NAMES),
                    ColumnSpec::new("email", ColumnType::String),
                    ColumnSpec::new("segment", ColumnType::String).samples(segments),
                    ColumnSpec::new("region", ColumnType::String).samples(REGIONS),
                    ColumnSpec::new("signup_date", ColumnType::Date),
                    ColumnSpec::new("interests", ColumnType::String)
                        .multi()
                        .samples(terms.clone()),
                ],
                row_count: 200,
            },
            TableSpec {
                name: "products".to_string(),
                description: format!("{} offerings", research.company_name),
                columns: vec![
                    ColumnSpec::new("product_id", ColumnType::Integer),
                    ColumnSpec::new("name", ColumnType::String).samples(products),
                    ColumnSpec::new("category", ColumnType::String)
                        .samples([research.industry.clone()]),
                    ColumnSpec::new("price", ColumnType::Float),
                    ColumnSpec::new("active", ColumnType::Boolean),
                    ColumnSpec::new("tags", ColumnType::String).multi().samples(terms),
                ],
                row_count: 40,
            },
            TableSpec {
                name: "orders".to_string(),
                description: "One row per customer order".to_string(),
                columns: vec![
                    ColumnSpec::new("order_id", ColumnType::Integer),
                    ColumnSpec::new("customer_id", ColumnType::Integer)
                        .references("customers.customer_id"),
                    ColumnSpec::new("product_id", ColumnType::Integer)
                        .references("products.product_id"),
                    ColumnSpec::new("quantity", ColumnType::Integer),
                    ColumnSpec::new("amount", ColumnType::Float),
                    ColumnSpec::new("ordered_at", ColumnType::Timestamp),
                    ColumnSpec::new("channel", ColumnType::String).samples(CHANNELS),
                ],
                row_count: 1000,
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_model_is_valid_and_covers_queries() {
        let research = CompanyResearch {
            company_name: "Acme".to_string(),
            industry: "Retail".to_string(),
            ..Default::default()
        };
        let model = data_model(&research);
        model.validate().unwrap();

        for query in golden_queries(&research) {
            let lowered = query.sql.to_lowercase();
            let referenced = ["customers", "products", "orders"]
                .iter()
                .filter(|t| lowered.contains(&format!("from {}", t)) || lowered.contains(&format!("join {}", t)))
                .count();
            assert!(referenced > 0, "query '{}' references no model table", query.question);
        }
    }

    #[test]
    fn test_storyline_questions_match_queries() {
        let research = CompanyResearch {
            company_name: "Acme".to_string(),
            offerings: vec!["Anvils".to_string()],
            ..Default::default()
        };
        let storyline = storyline(&research);
        assert!(storyline.title.starts_with("Acme"));
        assert!(storyline.business_questions.iter().any(|q| q.contains("anvils")));
        assert_eq!(personas(&research).len(), 2);
    }
}
