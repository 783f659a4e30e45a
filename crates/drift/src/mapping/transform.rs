//! Principal entity to canonical record.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::index::RelationshipIndex;
use super::record::CanonicalRecord;
use crate::entity::{Bucket, Entity, RecordClass, SchemaRole};
use crate::error::MappingError;

/// How the `gender` property is coded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenderPolicy {
    /// `male` -> M, `female` -> F, anything else is left out.
    #[default]
    TriState,
    /// `male` -> M, anything else -> F.
    Binary,
}

impl GenderPolicy {
    fn code(&self, value: &str) -> Option<&'static str> {
        match (self, value) {
            (_, "male") => Some("M"),
            (GenderPolicy::TriState, "female") => Some("F"),
            (GenderPolicy::TriState, _) => None,
            (GenderPolicy::Binary, _) => Some("F"),
        }
    }
}

/// Properties holding names of the entity.
const NAME_PROPS: [&str; 3] = ["name", "alias", "previousName"];

/// Single-valued personal and registration fields: (output, property).
const SINGLE_FIELDS: [(&str, &str); 7] = [
    ("DATE_OF_BIRTH", "birthDate"),
    ("DATE_OF_DEATH", "deathDate"),
    ("PLACE_OF_BIRTH", "birthPlace"),
    ("NATIONALITY", "nationality"),
    ("REGISTRATION_DATE", "incorporationDate"),
    ("NATIONAL_ID_NUMBER", "idNumber"),
    ("TAX_ID_NUMBER", "taxNumber"),
];

/// Relationship buckets in lookup order with their (role, counterpart) properties.
const RELATIONSHIP_PROBES: [(Bucket, &str, &str); 8] = [
    (Bucket::UnknownLinks, "role", "object"),
    (Bucket::Ownerships, "role", "asset"),
    (Bucket::Directorships, "role", "organization"),
    (Bucket::Employments, "role", "employee"),
    (Bucket::Memberships, "role", "organization"),
    (Bucket::Representations, "role", "client"),
    (Bucket::Families, "relationship", "relative"),
    (Bucket::Associates, "relationship", "associate"),
];

/// Identifier codes carried by every principal.
const CODE_FIELDS: [(&str, &str); 7] = [
    ("INN_CODE", "innCode"),
    ("VAT_CODE", "vatCode"),
    ("DUNS_NUMBER", "dunsCode"),
    ("SWIFT_BIC_CODE", "swiftBic"),
    ("ICIJ_ID_CODE", "icijId"),
    ("OKPO_CODE", "okpoCode"),
    ("BVDID_CODE", "bvdid"),
];

/// Registry codes only organizations carry.
const ORG_CODE_FIELDS: [(&str, &str); 11] = [
    ("VOEN_CODE", "voenCode"),
    ("BIK_CODE", "bikCode"),
    ("IRS_CODE", "irsCode"),
    ("IPO_CODE", "ipoCode"),
    ("CIK_CODE", "cikCode"),
    ("JIB_CODE", "jibCode"),
    ("CAEM_CODE", "caemCode"),
    ("COATO_CODE", "coatoCode"),
    ("OGRN_CODE", "ogrnCode"),
    ("PRF_NUMBER_CODE", "pfrNumber"),
    ("OKSM_CODE", "oksmCode"),
];

/// Turns principal entities into canonical records for one data source.
#[derive(Debug, Clone)]
pub struct Transformer {
    data_source: String,
    gender: GenderPolicy,
}

impl Transformer {
    pub fn new(data_source: impl Into<String>, gender: GenderPolicy) -> Self {
        Self {
            data_source: data_source.into(),
            gender,
        }
    }

    pub fn data_source(&self) -> &str {
        &self.data_source
    }

    /// Flatten `principal` using the attachments filed in `index`.
    pub fn transform(
        &self,
        principal: &Entity,
        index: &RelationshipIndex,
    ) -> Result<CanonicalRecord, MappingError> {
        let SchemaRole::Principal(class) = principal.schema().role() else {
            return Err(MappingError::NotPrincipal {
                id: principal.id().to_string(),
                schema: principal.schema().to_string(),
            });
        };
        let is_org = class == RecordClass::Organization;

        let mut record = CanonicalRecord::new(&self.data_source, principal.id());
        if let Some(record_type) = class.record_type() {
            record.set("RECORD_TYPE", record_type);
        }
        match class {
            RecordClass::Person => record.set_multi("CITIZENSHIP", strs(principal, "country")),
            RecordClass::Organization => {
                record.set_multi("REGISTRATION_COUNTRY", strs(principal, "mainCountry"))
            }
            RecordClass::Legal => {}
        }

        record.set_list("NAME_LIST", names(principal, class.name_field()));
        record.set_list(
            "ADDRESS_LIST",
            addresses(principal, index, class.address_label()),
        );

        if let Some(gender) = principal
            .values("gender")
            .iter()
            .filter_map(|g| self.gender.code(g))
            .next_back()
        {
            record.set("GENDER", gender);
        }
        for (field, prop) in SINGLE_FIELDS {
            if let Some(value) = principal.first(prop) {
                record.set(field, value);
            }
        }

        record.set_multi("WEBSITE_ADDRESS", strs(principal, "website"));
        record.set_multi("EMAIL_ADDRESS", strs(principal, "email"));
        record.set_multi("PHONE_NUMBER", strs(principal, "phone"));
        let mut jurisdictions: Vec<&str> = strs(principal, "jurisdiction").collect();
        if is_org {
            jurisdictions.extend(strs(principal, "country"));
        }
        record.set_multi("COUNTRY_OF_ASSOCIATION", jurisdictions);

        record.set_list(
            "RELATIONSHIP_LIST",
            self.relationships(principal.id(), index),
        );

        self.passport(principal, index, &mut record);
        let org_codes: &[(&str, &str)] = if is_org { &ORG_CODE_FIELDS } else { &[] };
        for (field, prop) in CODE_FIELDS.iter().chain(org_codes) {
            if let Some(value) = principal.first(prop) {
                record.set(field, value);
            }
        }

        Ok(record)
    }

    /// Anchor on the first attachment found, then one pointer per role and
    /// distinct counterpart. Attachments without a role use their schema name.
    fn relationships(&self, id: &str, index: &RelationshipIndex) -> Vec<Value> {
        let mut list = Vec::new();

        for (bucket, role_prop, counterpart_prop) in RELATIONSHIP_PROBES {
            for link in index.attachments(bucket, id) {
                if list.is_empty() {
                    list.push(json!({
                        "REL_ANCHOR_DOMAIN": self.data_source,
                        "REL_ANCHOR_KEY": id,
                    }));
                }

                let mut roles: Vec<&str> = strs(link, role_prop).collect();
                if roles.is_empty() {
                    roles.push(link.schema().name());
                }
                let counterparts: IndexSet<&str> = strs(link, counterpart_prop).collect();

                for role in roles {
                    for counterpart in &counterparts {
                        list.push(json!({
                            "REL_POINTER_DOMAIN": self.data_source,
                            "REL_POINTER_KEY": counterpart,
                            "REL_POINTER_ROLE": role,
                        }));
                    }
                }
            }
        }

        list
    }

    fn passport(&self, principal: &Entity, index: &RelationshipIndex, record: &mut CanonicalRecord) {
        let attached = index
            .attachments(Bucket::Identifications, principal.id())
            .iter()
            .filter(|doc| doc.schema().is_passport())
            .find_map(|doc| doc.first("number").map(|number| (number, doc.first("country"))));

        match attached {
            Some((number, country)) => {
                record.set("PASSPORT_NUMBER", number);
                if let Some(country) = country {
                    record.set("PASSPORT_COUNTRY", country);
                }
            }
            None => {
                if let Some(number) = principal.first("passportNumber") {
                    record.set("PASSPORT_NUMBER", number);
                }
            }
        }
    }
}

fn strs<'a>(entity: &'a Entity, prop: &str) -> impl Iterator<Item = &'a str> + use<'a> {
    entity
        .values(prop)
        .iter()
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

fn name_entry(name_type: &str, name_field: &str, name: &str) -> Value {
    let mut entry = Map::new();
    entry.insert("NAME_TYPE".to_string(), json!(name_type));
    entry.insert(name_field.to_string(), json!(name));
    Value::Object(entry)
}

fn names(entity: &Entity, name_field: &str) -> Vec<Value> {
    let caption = entity.caption();
    let mut list: Vec<Value> = NAME_PROPS
        .iter()
        .flat_map(|prop| strs(entity, prop))
        .map(|name| {
            let name_type = if Some(name) == caption {
                "PRIMARY"
            } else {
                "ALIAS"
            };
            name_entry(name_type, name_field, name)
        })
        .collect();

    list.extend(
        strs(entity, "weakAlias")
            .flat_map(|alias| alias.split('\n'))
            .filter(|alias| !alias.is_empty())
            .map(|alias| name_entry("ALIAS", name_field, alias)),
    );
    list
}

fn addresses(entity: &Entity, index: &RelationshipIndex, first_label: &str) -> Vec<Value> {
    let structured = strs(entity, "addressEntity")
        .filter_map(|id| index.address(id))
        .map(address_fields);
    let free_text = strs(entity, "address").map(|full| {
        let mut fields = Map::new();
        fields.insert("ADDR_FULL".to_string(), json!(full));
        fields
    });

    structured
        .chain(free_text)
        .enumerate()
        .map(|(i, fields)| {
            let label = if i == 0 { first_label } else { "OTHER" };
            let mut entry = Map::new();
            entry.insert("ADDR_TYPE".to_string(), json!(label));
            entry.extend(fields);
            Value::Object(entry)
        })
        .collect()
}

fn address_fields(address: &Entity) -> Map<String, Value> {
    let mut fields = Map::new();
    let parts: &[(&str, &str)] = if address.has("postalCode") || address.has("city") {
        &[
            ("ADDR_LINE1", "street"),
            ("ADDR_LINE2", "street2"),
            ("ADDR_CITY", "city"),
            ("ADDR_STATE", "state"),
            ("ADDR_COUNTRY", "country"),
            ("ADDR_POSTAL_CODE", "postalCode"),
        ]
    } else {
        &[("ADDR_FULL", "full")]
    };
    for (field, prop) in parts {
        if let Some(value) = address.first(prop) {
            fields.insert(field.to_string(), json!(value));
        }
    }
    fields
}
