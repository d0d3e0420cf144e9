//! Instruction templates sent alongside the inline images.
//!
//! Every builder is a pure function of its arguments. Caller-supplied text
//! goes through [`sanitize_prompt_value`] first so it cannot close a quote,
//! open a code fence, or smuggle extra instructions onto new lines.

use crate::items::Category;

pub const MAX_PROMPT_VALUE_CHARS: usize = 160;

pub fn sanitize_prompt_value(raw: &str) -> String {
    let cleaned = raw
        .chars()
        .map(|ch| match ch {
            '"' | '`' | '\\' | '{' | '}' => ' ',
            ch if ch.is_control() => ' ',
            ch => ch,
        })
        .collect::<String>();
    let collapsed = cleaned.split_whitespace().collect::<Vec<&str>>().join(" ");
    if collapsed.chars().count() <= MAX_PROMPT_VALUE_CHARS {
        return collapsed;
    }
    collapsed
        .chars()
        .take(MAX_PROMPT_VALUE_CHARS)
        .collect::<String>()
        .trim()
        .to_string()
}

fn category_list() -> String {
    Category::ALL
        .iter()
        .map(|category| format!("\"{}\"", category.as_str()))
        .collect::<Vec<String>>()
        .join(", ")
}

pub fn detection_prompt() -> String {
    format!(
        r#"You are a fashion expert and product tagging system.

Analyze this fashion image and identify the key clothing items.
For each item, extract:

- name: a short human-friendly name (e.g. "Leather Biker Jacket").
- category: one of [{categories}].
- color: main visible color(s) in simple terms (e.g. "black", "beige", "navy").
- material: best-guess main material (e.g. "leather", "denim", "cotton", "wool", "synthetic").
- brand: best guess, or "Unknown" if you are not confident.
- price: estimated retail price in USD as a string (e.g. "$120").
- matchScore: confidence (0-100) that this is a key fashion item in the image.
- boundingBox: a TIGHT box around ONLY this item, as {{ "x": number, "y": number, "width": number, "height": number }}.
- searchQuery: a short shopping query that would find this item.

BOUNDING BOX RULES:
- x, y are the TOP-LEFT corner; width, height are the size of the box.
- ALL values are normalized to 0..1 relative to the full image:
  x = left_pixel / image_width, y = top_pixel / image_height,
  width = box_pixel_width / image_width, height = box_pixel_height / image_height.
- The box stays inside the image: 0 <= x <= 1, 0 <= y <= 1, 0 < width <= 1 - x, 0 < height <= 1 - y.
- If the item is partially cut off, include only the visible region.
- Prefer 3 decimal places.

CATEGORY GUIDELINES:
- "top": shoulder line down to the hem of the top; not the pants, at most a little of the head.
- "bottom": waist/hip line down to the hem of both legs; never the shoes.
- "shoes": only the shoes with a small margin; no knees or large parts of the legs.
- "bag": the whole bag body and the full handle.
- Neck scarf or neck accessory: the neck/chest area, not the face or hair.
- If several people appear, focus on the main centered person.
- Never output boxes such as [0,0,1,1] unless the item truly fills the frame.
- Never group several categories into one box.

Return ONLY a valid JSON object with this exact structure:

{{
  "items": [
    {{
      "name": "string",
      "brand": "string",
      "price": "string",
      "matchScore": number,
      "category": "string",
      "color": "string",
      "material": "string",
      "boundingBox": {{ "x": number, "y": number, "width": number, "height": number }},
      "searchQuery": "string"
    }}
  ]
}}

Do not include markdown, explanations, or extra text. Only return the JSON."#,
        categories = category_list()
    )
}

/// Attributes known about an item before a thumbnail is generated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemLabel {
    pub name: Option<String>,
    pub category: Option<String>,
    pub color: Option<String>,
}

impl ItemLabel {
    /// `category / color / name`, or "clothing item" when nothing is known.
    pub fn render(&self) -> String {
        let parts = [&self.category, &self.color, &self.name]
            .into_iter()
            .flatten()
            .map(|value| sanitize_prompt_value(value))
            .filter(|value| !value.is_empty())
            .collect::<Vec<String>>();
        if parts.is_empty() {
            return "clothing item".to_string();
        }
        parts.join(" / ")
    }

    /// `color category name`, used for text-only generation.
    pub fn describe(&self) -> String {
        [&self.color, &self.category, &self.name]
            .into_iter()
            .flatten()
            .map(|value| sanitize_prompt_value(value))
            .filter(|value| !value.is_empty())
            .collect::<Vec<String>>()
            .join(" ")
    }
}

pub fn thumbnail_from_image_prompt(label: &ItemLabel) -> String {
    format!(
        r#"You are an expert AI fashion photographer and product retoucher.

TASK: Convert the clothing shown in the image into a clean e-commerce product thumbnail.

SOURCE IMAGE:
- The input image shows a clothing item, usually worn by a person or partially visible.
- Isolate ONLY the clothing item and regenerate it as a standalone product photo.

CLOTHING ITEM:
- Treat the item as: {label}
- Preserve the design, color, pattern and material as accurately as possible.
- Do not change the style or overall silhouette.

OUTPUT REQUIREMENTS:
- Show ONLY the clothing item: no person, body parts, face or hair.
- Clean, simple background (solid white or very light gray).
- Item centered, well-lit and sharp, in a professional e-commerce product shot.
- Natural shadows allowed; no busy environment.
- No logos, text overlays or watermarks that were not on the original garment.
- Do not add accessories that were not in the original crop.
- Do not crop the item awkwardly; it must be fully visible and easy to recognize.

RESULT:
Return a single high-quality product thumbnail image of the clothing item on a clean background."#,
        label = label.render()
    )
}

pub fn thumbnail_from_text_prompt(description: &str) -> String {
    let description = sanitize_prompt_value(description);
    let description = if description.is_empty() {
        "clothing item".to_string()
    } else {
        description
    };
    format!(
        r#"You are an expert AI fashion designer and photographer.

TASK: Generate a high-quality e-commerce product thumbnail for a fashion item based on the description.

ITEM DESCRIPTION:
{description}

OUTPUT REQUIREMENTS:
- Show ONLY the clothing item: no person, body parts, face or hair.
- Clean, simple background (solid white or very light gray).
- Item centered, well-lit and sharp, in a professional e-commerce product shot.
- Natural shadows and subtle reflections allowed.

RESULT:
Return a single high-quality product thumbnail image of the described item."#
    )
}

pub fn product_search_prompt(query: Option<&str>) -> String {
    let subject = match query.map(sanitize_prompt_value) {
        Some(query) if !query.is_empty() => format!(
            "Analyze the provided fashion item image (if any) and the search query: \"{query}\"."
        ),
        _ => "Analyze the provided fashion item image.".to_string(),
    };
    format!(
        r#"You are an AI fashion shopping assistant.
{subject}

Generate a list of 4-6 REALISTIC similar fashion products that someone might want to buy.
For each product, provide:
1. title (brand + item name)
2. price (in USD, as a string)
3. imageUrl (a realistic placeholder image URL matching the description)
4. purchaseUrl (a mock shop URL)

For image URLs prefer these Unsplash photos when the category matches:
- Jacket/Coat: photo-1551028919-ac6635f0e5c9, photo-1544923246-77307dd654cb
- Top/Shirt: photo-1521572163474-6864f9cf17ab, photo-1618354691373-d851c5c3a990
- Pants/Jeans: photo-1542272454315-4c01d7abdf4a, photo-1584370848010-d7d6ac627ed8
- Shoes: photo-1549298916-b41d501d3772, photo-1560769629-975ec94e6a86
- Bag: photo-1584917865442-de89df76afd3, photo-1590874103328-eac38a683ce7

Return ONLY a valid JSON object with this structure:
{{
  "products": [
    {{ "title": "string", "price": "string", "imageUrl": "string", "purchaseUrl": "string" }}
  ]
}}"#
    )
}

pub fn virtual_try_on_prompt(garment_count: usize) -> String {
    let garments = if garment_count > 1 {
        format!("IMAGE 2 to IMAGE {}", garment_count + 1)
    } else {
        "IMAGE 2".to_string()
    };
    format!(
        r#"You are an expert AI for virtual try-on.
TASK: Generate a NEW image of the person from IMAGE 1 wearing the clothing from {garments}.

INPUTS:
- IMAGE 1: TARGET MODEL (the person who will wear the clothes).
- {garments}: CLOTHING ITEMS (the clothes to transfer).

CRITICAL INSTRUCTIONS:
1. TARGET: use the person and pose from IMAGE 1.
2. OUTFIT: transfer the clothing items onto the person in IMAGE 1.
3. OUTPUT: a high-quality photorealistic image of that person wearing the new outfit.

Do not simply return any of the input images.
Do not change the identity or pose of the person in IMAGE 1.
Do not change the aspect ratio or composition; match the framing of IMAGE 1 exactly.
The result must look like the person in IMAGE 1 changed their clothes."#
    )
}
