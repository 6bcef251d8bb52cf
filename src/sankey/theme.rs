//! Color palettes and legends

use std::collections::BTreeMap;

use super::types::{Legend, LegendItem, LegendSection, NodeCategory, Styling};

pub const DEFAULT_THEME: &str = "targetprocess";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    TargetProcess,
    Default,
}

impl Theme {
    /// Recognized theme names only
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "targetprocess" => Some(Theme::TargetProcess),
            "default" => Some(Theme::Default),
            _ => None,
        }
    }

    /// Unrecognized names get the default palette
    pub fn parse(name: &str) -> Self {
        Self::from_name(name).unwrap_or(Theme::Default)
    }

    pub fn name(self) -> &'static str {
        match self {
            Theme::TargetProcess => "targetprocess",
            Theme::Default => "default",
        }
    }

    pub fn colors(self) -> BTreeMap<String, String> {
        match self {
            Theme::TargetProcess => NodeCategory::ALL
                .iter()
                .map(|c| (c.as_str().to_string(), category_color(*c).to_string()))
                .collect(),
            Theme::Default => [
                ("default", "#1f77b4"),
                ("secondary", "#ff7f0e"),
                ("tertiary", "#2ca02c"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        }
    }

    pub fn legend(self) -> Legend {
        match self {
            Theme::TargetProcess => Legend {
                sections: vec![
                    section(
                        "Portfolios",
                        &[
                            ("#3498db", "AI Portfolio"),
                            ("#2980b9", "Transformation Portfolio"),
                            ("#1abc9c", "Cloud Portfolio"),
                            ("#34495e", "Other Portfolios"),
                        ],
                    ),
                    section(
                        "Team Cost Tiers",
                        &[
                            ("#8e44ad", "Premium Teams (>$600/hr)"),
                            ("#d35400", "High-Cost Teams ($400-600/hr)"),
                            ("#f39c12", "Mid-Tier Teams ($200-400/hr)"),
                            ("#2ecc71", "Standard Teams (<$200/hr)"),
                        ],
                    ),
                    section(
                        "Work Types",
                        &[
                            ("#e74c3c", "AI/ML Work"),
                            ("#e67e22", "Transformation Work"),
                            ("#f39c12", "Infrastructure Work"),
                            ("#f1c40f", "Testing Work"),
                        ],
                    ),
                ],
            },
            Theme::Default => Legend {
                sections: vec![section(
                    "Default Theme",
                    &[
                        ("#1f77b4", "Primary"),
                        ("#ff7f0e", "Secondary"),
                        ("#2ca02c", "Tertiary"),
                    ],
                )],
            },
        }
    }

    pub fn styling(self) -> Styling {
        Styling {
            colors: self.colors(),
            legend: self.legend(),
        }
    }
}

fn category_color(category: NodeCategory) -> &'static str {
    match category {
        NodeCategory::PortfolioAi => "#3498db",
        NodeCategory::PortfolioTransform => "#2980b9",
        NodeCategory::PortfolioCloud => "#1abc9c",
        NodeCategory::PortfolioDefault => "#34495e",
        NodeCategory::EpicAi => "#9b59b6",
        NodeCategory::EpicTransform => "#16a085",
        NodeCategory::EpicCloud => "#27ae60",
        NodeCategory::EpicTest => "#95a5a6",
        NodeCategory::EpicDefault => "#7f8c8d",
        NodeCategory::WorkAi => "#e74c3c",
        NodeCategory::WorkTransform => "#e67e22",
        NodeCategory::WorkInfra => "#f39c12",
        NodeCategory::WorkTest => "#f1c40f",
        NodeCategory::WorkDefault => "#bdc3c7",
        NodeCategory::TeamPremium => "#8e44ad",
        NodeCategory::TeamHigh => "#d35400",
        NodeCategory::TeamMid => "#f39c12",
        NodeCategory::TeamStandard => "#2ecc71",
    }
}

fn section(title: &str, items: &[(&str, &str)]) -> LegendSection {
    LegendSection {
        title: title.to_string(),
        items: items
            .iter()
            .map(|(color, label)| LegendItem {
                color: color.to_string(),
                label: label.to_string(),
            })
            .collect(),
    }
}
