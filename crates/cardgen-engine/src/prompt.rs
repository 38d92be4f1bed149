use cardgen_contracts::models::ConceptCatalog;
use cardgen_contracts::request::Side;

/// Brand constants baked into every prompt and into output file names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrandProfile {
    pub name: String,
    pub title: String,
    pub company: String,
    pub tagline: String,
    pub email: String,
    pub website: String,
    pub location: String,
    pub phone: String,
    pub background_color: String,
    pub accent_color: String,
    pub text_color: String,
    /// Leading segment of every persisted file name.
    pub file_prefix: String,
}

impl Default for BrandProfile {
    fn default() -> Self {
        Self {
            name: "Alex Shafiro PT / DPT / OCS / CSCS".to_string(),
            title: "Rehabilitation Specialist".to_string(),
            company: "A Stronger Life".to_string(),
            tagline: "Revolutionary Rehabilitation".to_string(),
            email: "admin@aslstrong.com".to_string(),
            website: "www.aslstrong.com".to_string(),
            location: "Stamford, CT".to_string(),
            phone: "(914) 246-5010".to_string(),
            background_color: "#0A0A0A".to_string(),
            accent_color: "#00C9A7".to_string(),
            text_color: "#FAFAFA".to_string(),
            file_prefix: "ASL_Alex_Shafiro".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    brand: BrandProfile,
    concepts: ConceptCatalog,
}

impl PromptBuilder {
    pub fn new(brand: BrandProfile, concepts: ConceptCatalog) -> Self {
        Self { brand, concepts }
    }

    pub fn brand(&self) -> &BrandProfile {
        &self.brand
    }

    pub fn concepts(&self) -> &ConceptCatalog {
        &self.concepts
    }

    /// Provider-agnostic prompt. Same inputs always give the same text.
    pub fn build(&self, concept: &str, side: Side) -> String {
        let brand = &self.brand;
        let mut prompt = format!(
            "Professional business card design for premium rehabilitation practice:

CRITICAL SPECIFICATIONS:
- Completely flat 2D design (NO 3D mockups, NO shadows, NO perspective)
- Business card proportions: 3.5\" x 2.0\"
- Deep matte black background ({bg})
- Single emerald accent color ({accent}) for highlights only
- Arctic white text ({text}) for maximum contrast
- Sophisticated restraint, clinical authority with premium polish

BRAND INFORMATION:
Name: {name}
Title: {title}
Company: {company}
Tagline: {tagline}
Email: {email}
Website: {website}
Location: {location}
Phone: {phone}
",
            bg = brand.background_color,
            accent = brand.accent_color,
            text = brand.text_color,
            name = brand.name,
            title = brand.title,
            company = brand.company,
            tagline = brand.tagline,
            email = brand.email,
            website = brand.website,
            location = brand.location,
            phone = brand.phone,
        );

        match side {
            Side::Front => prompt.push_str(&format!(
                "
FRONT CARD LAYOUT:
- Logo area (top-left): \"{company}\" logo placeholder
- Name/title block (center-left): primary prominence for name
- Contact information (left column): phone, email, website, location
- QR code area (bottom-right): small QR code placeholder
- Professional hierarchy with generous negative space
",
                company = brand.company
            )),
            Side::Back => prompt.push_str(&format!(
                "
BACK CARD LAYOUT:
- Centered tagline: \"{tagline}\"
- Bold uppercase lettering with increased letter spacing
- QR code area (bottom-right): small QR code placeholder
- Optional: subtle company logo watermark at 3% opacity maximum
- Maximum negative space for sophisticated impact
",
                tagline = brand.tagline
            )),
        }

        prompt.push_str(&format!(
            "
DESIGN CONCEPT: {}

OUTPUT: Flat artboard design ready for professional printing.",
            self.concepts.style_for(concept)
        ));
        prompt
    }
}
