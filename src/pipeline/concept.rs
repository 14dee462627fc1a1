use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scheduler::job::AppSpec;

/// Structured interpretation of an application idea.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    pub app_name: String,
    pub description: String,
    pub category: String,
    pub features: Vec<String>,
    /// Screen (activity) names, the first one being the launcher screen
    pub screens: Vec<String>,
    pub permissions: Vec<String>,
    pub dependencies: Vec<String>,
}

#[derive(Error, Debug)]
pub enum ConceptError {
    #[error("Concept service unavailable: {0}")]
    Unavailable(String),

    #[error("Concept service returned an unusable answer: {0}")]
    Malformed(String),
}

/// Turns a free-form idea into a [`Concept`].
///
/// Implementations may call out to a remote service; they run on the
/// blocking pool, and any error makes the pipeline fall back to
/// [`HeuristicConcept`].
pub trait ConceptService: Send + Sync {
    fn analyze(&self, spec: &AppSpec) -> Result<Concept, ConceptError>;
}

struct CategoryTemplate {
    category: &'static str,
    keywords: &'static [&'static str],
    app_name: &'static str,
    description: &'static str,
    features: &'static [&'static str],
    screens: &'static [&'static str],
    permissions: &'static [&'static str],
    dependencies: &'static [&'static str],
}

// Checked in order; the first category with a matching keyword wins.
const CATEGORIES: &[CategoryTemplate] = &[
    CategoryTemplate {
        category: "social",
        keywords: &["social", "media", "share", "follow", "friend", "chat", "message"],
        app_name: "SocialConnect",
        description: "A modern social media application",
        features: &[
            "User profiles",
            "Post sharing",
            "Photo and video upload",
            "Likes and comments",
            "Follow system",
            "Messaging",
            "Notifications",
        ],
        screens: &["MainActivity", "ProfileActivity", "PostActivity", "FeedActivity", "ChatActivity"],
        permissions: &["INTERNET", "CAMERA", "READ_EXTERNAL_STORAGE"],
        dependencies: &["recyclerview", "cardview", "glide", "retrofit2"],
    },
    CategoryTemplate {
        category: "ecommerce",
        keywords: &["e-commerce", "ecommerce", "shop", "store", "sell", "product", "cart", "payment"],
        app_name: "ShopEasy",
        description: "A complete e-commerce application",
        features: &[
            "Product catalog",
            "Search and filtering",
            "Shopping cart",
            "Secure checkout",
            "Order tracking",
            "Favorite products",
        ],
        screens: &[
            "MainActivity",
            "ProductListActivity",
            "ProductDetailActivity",
            "CartActivity",
            "CheckoutActivity",
        ],
        permissions: &["INTERNET", "ACCESS_NETWORK_STATE"],
        dependencies: &["recyclerview", "cardview", "retrofit2", "gson"],
    },
    CategoryTemplate {
        category: "game",
        keywords: &["game", "play", "score", "level", "race", "puzzle"],
        app_name: "GameMaster",
        description: "A fun mobile game",
        features: &[
            "Game mechanics",
            "Score system",
            "Level progression",
            "Achievements",
            "Leaderboard",
            "Sound effects",
        ],
        screens: &["MainActivity", "GameActivity", "ScoreActivity", "LeaderboardActivity", "SettingsActivity"],
        permissions: &["VIBRATE"],
        dependencies: &["play-services-games"],
    },
    CategoryTemplate {
        category: "productivity",
        keywords: &["task", "todo", "to-do", "note", "plan", "organize", "productivity", "reminder"],
        app_name: "TaskMaster",
        description: "A productivity and task management application",
        features: &[
            "Task creation",
            "Category management",
            "Reminders",
            "Progress tracking",
            "Calendar integration",
            "Data backup",
        ],
        screens: &["MainActivity", "TaskActivity", "CategoryActivity", "CalendarActivity", "SettingsActivity"],
        permissions: &["SET_ALARM", "RECEIVE_BOOT_COMPLETED"],
        dependencies: &["room", "lifecycle-extensions"],
    },
    CategoryTemplate {
        category: "health",
        keywords: &["health", "fitness", "sport", "workout", "exercise", "step", "calorie", "water"],
        app_name: "HealthTracker",
        description: "A health and fitness tracking application",
        features: &[
            "Step counter",
            "Calorie tracking",
            "Workout plans",
            "Water intake",
            "Weight tracking",
            "Statistics",
        ],
        screens: &["MainActivity", "StepCounterActivity", "WorkoutActivity", "StatsActivity", "ProfileActivity"],
        permissions: &["ACTIVITY_RECOGNITION", "BODY_SENSORS"],
        dependencies: &["play-services-fitness", "charts"],
    },
];

const DEFAULT_CATEGORY: usize = 3;

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Local keyword matcher used when no concept service is configured or the
/// configured one fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicConcept;

impl HeuristicConcept {
    pub fn concept_for(&self, spec: &AppSpec) -> Concept {
        let idea = spec.idea.to_lowercase();
        let requested = spec.category.trim().to_lowercase();

        let by_request = CATEGORIES.iter().find(|c| c.category == requested);
        let by_keyword = || {
            CATEGORIES
                .iter()
                .find(|c| c.keywords.iter().any(|k| idea.contains(k)))
        };

        match by_request.or_else(by_keyword) {
            Some(template) => Self::from_template(template),
            None => {
                let mut concept = Self::from_template(&CATEGORIES[DEFAULT_CATEGORY]);
                concept.app_name = "CustomApp".to_string();
                concept.description = format!("Custom application: {}", spec.idea);
                concept
            }
        }
    }

    fn from_template(template: &CategoryTemplate) -> Concept {
        Concept {
            app_name: template.app_name.to_string(),
            description: template.description.to_string(),
            category: template.category.to_string(),
            features: owned(template.features),
            screens: owned(template.screens),
            permissions: owned(template.permissions),
            dependencies: owned(template.dependencies),
        }
    }
}

impl ConceptService for HeuristicConcept {
    fn analyze(&self, spec: &AppSpec) -> Result<Concept, ConceptError> {
        Ok(self.concept_for(spec))
    }
}
