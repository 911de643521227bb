//! Phone-number normalizer & country-code detector (component A).
//!
//! Ported from the source bot's `normalize_phone_number` /
//! `detect_country_code` / `extract_last_digits`, kept as plain functions
//! over a static dialing-prefix table the way `sms-solvers` keeps its
//! dial-code table as a `once_cell::sync::Lazy`.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Longest-prefix-first dialing code table. Entries are `(prefix-without-plus,
/// name)`; detection tries 4, then 3, then 2 digits after the leading `+`.
static DIAL_CODES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("1", "United States/Canada"),
        ("7", "Russia/Kazakhstan"),
        ("20", "Egypt"),
        ("33", "France"),
        ("34", "Spain"),
        ("39", "Italy"),
        ("44", "United Kingdom"),
        ("49", "Germany"),
        ("52", "Mexico"),
        ("55", "Brazil"),
        ("60", "Malaysia"),
        ("61", "Australia"),
        ("62", "Indonesia"),
        ("63", "Philippines"),
        ("64", "New Zealand"),
        ("65", "Singapore"),
        ("66", "Thailand"),
        ("81", "Japan"),
        ("82", "South Korea"),
        ("84", "Vietnam"),
        ("86", "China"),
        ("90", "Turkey"),
        ("91", "India"),
        ("92", "Pakistan"),
        ("93", "Afghanistan"),
        ("94", "Sri Lanka"),
        ("95", "Myanmar"),
        ("98", "Iran"),
        ("212", "Morocco"),
        ("213", "Algeria"),
        ("216", "Tunisia"),
        ("218", "Libya"),
        ("220", "Gambia"),
        ("221", "Senegal"),
        ("222", "Mauritania"),
        ("223", "Mali"),
        ("224", "Guinea"),
        ("225", "Ivory Coast"),
        ("226", "Burkina Faso"),
        ("227", "Niger"),
        ("228", "Togo"),
        ("229", "Benin"),
        ("230", "Mauritius"),
        ("231", "Liberia"),
        ("232", "Sierra Leone"),
        ("233", "Ghana"),
        ("234", "Nigeria"),
        ("235", "Chad"),
        ("236", "Central African Republic"),
        ("237", "Cameroon"),
        ("238", "Cape Verde"),
        ("239", "Sao Tome and Principe"),
        ("240", "Equatorial Guinea"),
        ("241", "Gabon"),
        ("242", "Republic of the Congo"),
        ("243", "Democratic Republic of the Congo"),
        ("244", "Angola"),
        ("245", "Guinea-Bissau"),
        ("246", "British Indian Ocean Territory"),
        ("248", "Seychelles"),
        ("249", "Sudan"),
        ("250", "Rwanda"),
        ("251", "Ethiopia"),
        ("252", "Somalia"),
        ("253", "Djibouti"),
        ("254", "Kenya"),
        ("255", "Tanzania"),
        ("256", "Uganda"),
        ("257", "Burundi"),
        ("258", "Mozambique"),
        ("260", "Zambia"),
        ("261", "Madagascar"),
        ("262", "Reunion"),
        ("263", "Zimbabwe"),
        ("264", "Namibia"),
        ("265", "Malawi"),
        ("266", "Lesotho"),
        ("267", "Botswana"),
        ("268", "Swaziland"),
        ("269", "Comoros"),
        ("290", "Saint Helena"),
        ("291", "Eritrea"),
        ("297", "Aruba"),
        ("298", "Faroe Islands"),
        ("299", "Greenland"),
        ("350", "Gibraltar"),
        ("351", "Portugal"),
        ("352", "Luxembourg"),
        ("353", "Ireland"),
        ("354", "Iceland"),
        ("355", "Albania"),
        ("356", "Malta"),
        ("357", "Cyprus"),
        ("358", "Finland"),
        ("359", "Bulgaria"),
        ("370", "Lithuania"),
        ("371", "Latvia"),
        ("372", "Estonia"),
        ("373", "Moldova"),
        ("374", "Armenia"),
        ("375", "Belarus"),
        ("376", "Andorra"),
        ("377", "Monaco"),
        ("378", "San Marino"),
        ("380", "Ukraine"),
        ("381", "Serbia"),
        ("382", "Montenegro"),
        ("383", "Kosovo"),
        ("385", "Croatia"),
        ("386", "Slovenia"),
        ("387", "Bosnia and Herzegovina"),
        ("389", "North Macedonia"),
        ("420", "Czechia"),
        ("421", "Slovakia"),
        ("423", "Liechtenstein"),
        ("500", "Falkland Islands"),
        ("501", "Belize"),
        ("502", "Guatemala"),
        ("503", "El Salvador"),
        ("504", "Honduras"),
        ("505", "Nicaragua"),
        ("506", "Costa Rica"),
        ("507", "Panama"),
        ("508", "Saint Pierre and Miquelon"),
        ("509", "Haiti"),
        ("590", "Guadeloupe"),
        ("591", "Bolivia"),
        ("592", "Guyana"),
        ("593", "Ecuador"),
        ("594", "French Guiana"),
        ("595", "Paraguay"),
        ("596", "Martinique"),
        ("597", "Suriname"),
        ("598", "Uruguay"),
        ("599", "Netherlands Antilles"),
        ("670", "East Timor"),
        ("672", "Antarctica"),
        ("673", "Brunei"),
        ("674", "Nauru"),
        ("675", "Papua New Guinea"),
        ("676", "Tonga"),
        ("677", "Solomon Islands"),
        ("678", "Vanuatu"),
        ("679", "Fiji"),
        ("680", "Palau"),
        ("681", "Wallis and Futuna"),
        ("682", "Cook Islands"),
        ("683", "Niue"),
        ("684", "American Samoa"),
        ("685", "Samoa"),
        ("686", "Kiribati"),
        ("687", "New Caledonia"),
        ("688", "Tuvalu"),
        ("689", "French Polynesia"),
        ("690", "Tokelau"),
        ("691", "Micronesia"),
        ("692", "Marshall Islands"),
        ("850", "North Korea"),
        ("852", "Hong Kong"),
        ("853", "Macau"),
        ("855", "Cambodia"),
        ("856", "Laos"),
        ("880", "Bangladesh"),
        ("886", "Taiwan"),
        ("960", "Maldives"),
        ("961", "Lebanon"),
        ("962", "Jordan"),
        ("963", "Syria"),
        ("964", "Iraq"),
        ("965", "Kuwait"),
        ("966", "Saudi Arabia"),
        ("967", "Yemen"),
        ("968", "Oman"),
        ("970", "Palestine"),
        ("971", "United Arab Emirates"),
        ("972", "Israel"),
        ("973", "Bahrain"),
        ("974", "Qatar"),
        ("975", "Bhutan"),
        ("976", "Mongolia"),
        ("977", "Nepal"),
        ("992", "Tajikistan"),
        ("993", "Turkmenistan"),
        ("994", "Azerbaijan"),
        ("995", "Georgia"),
        ("996", "Kyrgyzstan"),
        ("998", "Uzbekistan"),
    ]
    .into_iter()
    .collect()
});

const DEFAULT_PREFIX: &str = "1";

/// Strip to `+<digits>`, collapse multiple `+`, drop a leading international
/// `00`, and enforce the 7-15 digit length window. Returns empty string
/// (the sentinel for "not a phone number") on any failure.
pub fn normalize(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let mut filtered: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '+').collect();

    if filtered.matches('+').count() > 1 {
        filtered = format!("+{}", filtered.replace('+', ""));
    }
    if !filtered.starts_with('+') {
        filtered = format!("+{filtered}");
    }

    let mut digits = filtered.trim_start_matches('+').to_string();
    if !digits.chars().all(|c| c.is_ascii_digit()) || digits.len() < 7 {
        return String::new();
    }

    if digits.starts_with("00") {
        digits = digits[2..].to_string();
    }

    if digits.len() < 7 || digits.len() > 15 {
        return String::new();
    }

    format!("+{digits}")
}

/// `normalize(normalize(x)) == normalize(x)` holds by construction: a
/// string already in canonical `+<7-15 digits>` form passes every check
/// above unchanged.
pub fn detect_country(e164: &str) -> String {
    let digits = e164.trim_start_matches('+');
    for len in [4usize, 3, 2] {
        if digits.len() >= len {
            let prefix = &digits[..len];
            if DIAL_CODES.contains_key(prefix) {
                return format!("+{prefix}");
            }
        }
    }
    format!("+{DEFAULT_PREFIX}")
}

pub fn country_name(country_code: &str) -> &'static str {
    DIAL_CODES
        .get(country_code.trim_start_matches('+'))
        .copied()
        .unwrap_or("Unknown")
}

/// Returns the final `n` digits of the digit-only form of `phone`, or all of
/// them if fewer than `n` are present.
pub fn extract_last_digits(phone: &str, n: usize) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= n {
        digits
    } else {
        digits[digits.len() - n..].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_plain_number() {
        assert_eq!(normalize("+20 111 222 3344"), "+201112223344");
    }

    #[test]
    fn strips_international_prefix() {
        assert_eq!(normalize("0020111222 3344"), "+201112223344");
    }

    #[test]
    fn rejects_too_short() {
        assert_eq!(normalize("+123"), "");
    }

    #[test]
    fn rejects_non_digits() {
        assert_eq!(normalize("abc"), "");
    }

    #[test]
    fn round_trip_is_idempotent() {
        let once = normalize("+20 111-222-3344");
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn detects_known_country() {
        assert_eq!(detect_country("+201112223344"), "+20");
    }

    #[test]
    fn detects_default_for_unknown() {
        assert_eq!(detect_country("+9991234567"), "+1");
    }

    #[test]
    fn detection_stable_under_separators() {
        let a = detect_country(&normalize("+20 111 222 3344"));
        let b = detect_country(&normalize("0020-111-222-3344"));
        assert_eq!(a, b);
    }

    #[test]
    fn extracts_tail() {
        assert_eq!(extract_last_digits("+201112223407", 3), "407");
        assert_eq!(extract_last_digits("12", 5), "12");
    }
}
