use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogService {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub features: &'static [&'static str],
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AmcPlan {
    pub id: &'static str,
    pub title: &'static str,
    pub subtitle: &'static str,
    pub duration: &'static str,
    pub services_count: u32,
    pub features: &'static [&'static str],
    pub recommended: bool,
}

pub const SERVICES: &[CatalogService] = &[
    CatalogService {
        id: "install",
        title: "AC Installation",
        description: "Professional installation for Split and Window ACs with proper sealing and testing.",
        features: &["Wall drilling & fitting", "Gas pressure check", "Leakage testing", "30-day installation warranty"],
    },
    CatalogService {
        id: "repair",
        title: "AC Repair",
        description: "Diagnosis and repair of all AC issues including cooling, noise, and water leakage.",
        features: &["Advanced diagnosis", "PCB repair support", "Genuine spare parts", "90-day service warranty"],
    },
    CatalogService {
        id: "service",
        title: "AC Cleaning",
        description: "Comprehensive wet and dry servicing using jet pumps for deep cleaning.",
        features: &["Filter cleaning", "Coil washing", "Drain pipe cleaning", "Performance check"],
    },
    CatalogService {
        id: "gas",
        title: "Gas Refilling",
        description: "Top-up or full gas refilling for R22, R32, and R410A refrigerants.",
        features: &["Leak detection", "Vacuuming", "High-quality refrigerant", "Cooling efficiency check"],
    },
    CatalogService {
        id: "emergency",
        title: "Emergency Repair",
        description: "Urgent priority service for critical breakdown situations.",
        features: &["Priority arrival", "Senior technician", "All brands supported", "Immediate diagnosis"],
    },
    CatalogService {
        id: "uninstall",
        title: "Uninstallation",
        description: "Safe removal of AC units with gas locking technology.",
        features: &["Pump down gas lock", "Pipe safety", "Hole sealing", "Packing assistance"],
    },
];

pub const AMC_PLANS: &[AmcPlan] = &[
    AmcPlan {
        id: "basic",
        title: "Basic",
        subtitle: "Perfect for individual homeowners",
        duration: "1 Year",
        services_count: 1,
        features: &["Single AC service", "Basic inspection", "Filter cleaning", "30-day warranty", "Email support"],
        recommended: false,
    },
    AmcPlan {
        id: "premium",
        title: "Premium",
        subtitle: "Best for comprehensive coverage",
        duration: "1 Year",
        services_count: 4,
        features: &[
            "4 scheduled visits",
            "Priority support",
            "Gas top-up included",
            "Deep cleaning",
            "20% off repairs",
            "90-day warranty",
            "WhatsApp support",
        ],
        recommended: true,
    },
    AmcPlan {
        id: "business",
        title: "Business",
        subtitle: "For offices and commercial spaces",
        duration: "1 Year",
        services_count: 0,
        features: &[
            "Multiple AC units",
            "Dedicated manager",
            "Same-day response",
            "Smart monitoring",
            "Monthly reports",
            "Custom SLA",
            "24/7 phone support",
        ],
        recommended: false,
    },
];

pub fn is_known_service(id: &str) -> bool {
    SERVICES.iter().any(|s| s.id == id)
}

pub fn is_known_plan(id: &str) -> bool {
    AMC_PLANS.iter().any(|p| p.id == id)
}
