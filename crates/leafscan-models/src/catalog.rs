//! Leaf disease catalogue.
//!
//! Maps model class labels (e.g. `Tomato_Late_Blight`) to a short diagnosis
//! and a suggested remedy. Labels are matched after replacing spaces with
//! underscores, so `"Tomato Late Blight"` resolves to the same entry.

use serde::Serialize;

/// Text used when a class has no catalogue entry.
pub const INFO_NOT_AVAILABLE: &str = "Info not available";

/// Diagnosis and remedy text for one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiseaseInfo {
    pub diagnosis: &'static str,
    pub remedy: &'static str,
}

impl DiseaseInfo {
    /// Placeholder returned for unknown classes.
    pub const UNKNOWN: DiseaseInfo = DiseaseInfo {
        diagnosis: INFO_NOT_AVAILABLE,
        remedy: INFO_NOT_AVAILABLE,
    };
}

const CATALOG: &[(&str, DiseaseInfo)] = &[
    (
        "Tomato_Yellow_Leaf_Curl_Virus",
        DiseaseInfo {
            diagnosis: "A viral disease spread by whiteflies, causing curling and yellowing of leaves with stunted growth.",
            remedy: "Remove infected plants, control whiteflies using sticky traps or neem oil, and plant resistant varieties.",
        },
    ),
    (
        "Tomato_Mosaic_Virus",
        DiseaseInfo {
            diagnosis: "Viral infection leading to mottled, discolored leaves and reduced fruit quality.",
            remedy: "Remove infected plants, disinfect tools, and wash hands before handling plants (avoid tobacco exposure).",
        },
    ),
    (
        "Tomato_Target_Spot",
        DiseaseInfo {
            diagnosis: "Fungal disease causing brown concentric spots on leaves and fruit.",
            remedy: "Prune lower leaves, improve air circulation, and apply copper-based fungicide.",
        },
    ),
    (
        "Tomato_Spider_Mites",
        DiseaseInfo {
            diagnosis: "Tiny mites that cause yellow stippling and webbing on leaves.",
            remedy: "Spray leaves with water, neem oil, or insecticidal soap. Encourage natural predators like ladybugs.",
        },
    ),
    (
        "Tomato_Septoria_Leaf_Spot",
        DiseaseInfo {
            diagnosis: "Fungal infection causing small circular spots with dark borders on lower leaves.",
            remedy: "Remove infected leaves, avoid wetting foliage, and apply fungicide like mancozeb or chlorothalonil.",
        },
    ),
    (
        "Tomato_Leaf_Mold",
        DiseaseInfo {
            diagnosis: "High humidity fungal disease causing yellow spots and mold growth on leaves' underside.",
            remedy: "Increase ventilation, reduce humidity, and treat with sulfur or copper fungicides.",
        },
    ),
    (
        "Tomato_Late_Blight",
        DiseaseInfo {
            diagnosis: "Serious fungal disease causing dark, water-soaked lesions on leaves and fruit.",
            remedy: "Destroy infected plants, avoid overhead watering, and apply fungicides containing chlorothalonil.",
        },
    ),
    (
        "Tomato_Healthy",
        DiseaseInfo {
            diagnosis: "No signs of disease. Plant appears healthy and vigorous.",
            remedy: "Continue regular care; ensure balanced nutrients and pest monitoring.",
        },
    ),
    (
        "Tomato_Early_Blight",
        DiseaseInfo {
            diagnosis: "Fungal disease causing dark, concentric leaf spots that start on lower leaves.",
            remedy: "Remove affected leaves, rotate crops, and spray with fungicides like mancozeb.",
        },
    ),
    (
        "Tomato_Bacterial_Spot",
        DiseaseInfo {
            diagnosis: "Bacterial infection causing water-soaked lesions on leaves and fruits.",
            remedy: "Avoid overhead watering, use copper-based bactericides, and destroy infected debris.",
        },
    ),
    (
        "Potato_Healthy",
        DiseaseInfo {
            diagnosis: "No visible infection detected. Plant is healthy.",
            remedy: "Maintain good soil health, avoid overwatering, and monitor for pests.",
        },
    ),
    (
        "Potato_Late_Blight",
        DiseaseInfo {
            diagnosis: "Serious fungal disease leading to dark lesions and tuber rot.",
            remedy: "Remove infected plants, avoid wet foliage, and use preventive fungicides regularly.",
        },
    ),
    (
        "Potato_Early_Blight",
        DiseaseInfo {
            diagnosis: "Dark spots with concentric rings that lead to leaf drop.",
            remedy: "Remove infected leaves, apply fungicide, and ensure crop rotation.",
        },
    ),
    (
        "Corn_Healthy",
        DiseaseInfo {
            diagnosis: "No disease detected.",
            remedy: "Maintain field hygiene, balanced nutrition, and adequate spacing.",
        },
    ),
    (
        "Corn_Gray_Leaf_Spot",
        DiseaseInfo {
            diagnosis: "Gray or tan rectangular lesions caused by Cercospora fungus.",
            remedy: "Use resistant hybrids, rotate crops, and apply fungicides at early tasseling.",
        },
    ),
    (
        "Corn_Common_Rust",
        DiseaseInfo {
            diagnosis: "Small reddish-brown pustules on both sides of leaves.",
            remedy: "Use rust-resistant hybrids and apply fungicides when infection is severe.",
        },
    ),
    (
        "Corn_Blight",
        DiseaseInfo {
            diagnosis: "Fungal leaf disease causing elongated gray or tan lesions that reduce yield.",
            remedy: "Use resistant varieties, rotate crops, and remove infected residues.",
        },
    ),
    (
        "Rice_Brown_Spot",
        DiseaseInfo {
            diagnosis: "Fungal disease causing small brown spots on leaves and grains.",
            remedy: "Apply balanced fertilizers, improve drainage, and spray fungicide if needed.",
        },
    ),
    (
        "Rice_Leaf_Smut",
        DiseaseInfo {
            diagnosis: "Fungal infection forming black, dusty smut balls on leaves.",
            remedy: "Use disease-free seeds, avoid excessive nitrogen fertilizer, and treat with carbendazim.",
        },
    ),
    (
        "Rice_Bacterial_Leaf_Blight",
        DiseaseInfo {
            diagnosis: "Bacterial disease causing yellowing and wilting of leaves from tip downward.",
            remedy: "Use resistant varieties, avoid mechanical injury, and apply copper-based bactericide.",
        },
    ),
];

/// Normalize a model label into catalogue key form.
pub fn normalize_class_name(label: &str) -> String {
    label.trim().replace(' ', "_")
}

/// Look up the catalogue entry for a label, falling back to [`DiseaseInfo::UNKNOWN`].
pub fn lookup_disease(label: &str) -> DiseaseInfo {
    let key = normalize_class_name(label);
    CATALOG
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, info)| *info)
        .unwrap_or(DiseaseInfo::UNKNOWN)
}
