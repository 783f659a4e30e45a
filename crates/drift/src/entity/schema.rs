//! Schema names and the role each one plays in mapping.

use std::fmt;

/// Relationship index bucket an attachment is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    Directorships,
    Employments,
    Memberships,
    Representations,
    UnknownLinks,
    Ownerships,
    Identifications,
    Addresses,
    Families,
    Associates,
}

impl Bucket {
    pub const ALL: [Bucket; 10] = [
        Bucket::Directorships,
        Bucket::Employments,
        Bucket::Memberships,
        Bucket::Representations,
        Bucket::UnknownLinks,
        Bucket::Ownerships,
        Bucket::Identifications,
        Bucket::Addresses,
        Bucket::Families,
        Bucket::Associates,
    ];

    /// Property holding the ids this attachment is about.
    ///
    /// Addresses are keyed by their own id and return `None`.
    pub fn subject_property(&self) -> Option<&'static str> {
        match self {
            Bucket::Directorships => Some("director"),
            Bucket::Employments => Some("employer"),
            Bucket::Memberships => Some("member"),
            Bucket::Representations => Some("agent"),
            Bucket::UnknownLinks => Some("subject"),
            Bucket::Ownerships => Some("owner"),
            Bucket::Identifications => Some("holder"),
            Bucket::Addresses => None,
            Bucket::Families => Some("person"),
            Bucket::Associates => Some("person"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Directorships => "directorships",
            Bucket::Employments => "employments",
            Bucket::Memberships => "memberships",
            Bucket::Representations => "representations",
            Bucket::UnknownLinks => "unknown_links",
            Bucket::Ownerships => "ownerships",
            Bucket::Identifications => "identifications",
            Bucket::Addresses => "addresses",
            Bucket::Families => "families",
            Bucket::Associates => "associates",
        }
    }
}

/// The kind of canonical record a principal becomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordClass {
    Person,
    Organization,
    /// Generic legal entity; carries no `RECORD_TYPE`.
    Legal,
}

impl RecordClass {
    pub fn record_type(&self) -> Option<&'static str> {
        match self {
            RecordClass::Person => Some("PERSON"),
            RecordClass::Organization => Some("ORGANIZATION"),
            RecordClass::Legal => None,
        }
    }

    /// Label for the first address on the record.
    pub fn address_label(&self) -> &'static str {
        match self {
            RecordClass::Person => "HOME",
            RecordClass::Organization => "BUSINESS",
            RecordClass::Legal => "LEGAL",
        }
    }

    pub fn name_field(&self) -> &'static str {
        match self {
            RecordClass::Organization => "NAME_ORG",
            RecordClass::Person | RecordClass::Legal => "NAME_FULL",
        }
    }
}

/// What the mapping job does with an entity of a given schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaRole {
    /// Becomes one canonical record.
    Principal(RecordClass),
    /// Indexed under the subjects it references.
    Attachment(Bucket),
    /// Recognized, intentionally not mapped yet.
    Deferred,
    /// Not part of the mapping model.
    Unknown,
}

/// Entity schema as found in the `schema` field of an entity line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Schema {
    Person,
    Organization,
    Company,
    LegalEntity,
    PublicBody,
    Directorship,
    Employment,
    Membership,
    Representation,
    UnknownLink,
    Ownership,
    Identification,
    Passport,
    Address,
    Family,
    Associate,
    Succession,
    Other(String),
}

impl Schema {
    pub fn parse(name: &str) -> Self {
        match name {
            "Person" => Schema::Person,
            "Organization" => Schema::Organization,
            "Company" => Schema::Company,
            "LegalEntity" => Schema::LegalEntity,
            "PublicBody" => Schema::PublicBody,
            "Directorship" => Schema::Directorship,
            "Employment" => Schema::Employment,
            "Membership" => Schema::Membership,
            "Representation" => Schema::Representation,
            "UnknownLink" => Schema::UnknownLink,
            "Ownership" => Schema::Ownership,
            "Identification" => Schema::Identification,
            "Passport" => Schema::Passport,
            "Address" => Schema::Address,
            "Family" => Schema::Family,
            "Associate" => Schema::Associate,
            "Succession" => Schema::Succession,
            other => Schema::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Schema::Person => "Person",
            Schema::Organization => "Organization",
            Schema::Company => "Company",
            Schema::LegalEntity => "LegalEntity",
            Schema::PublicBody => "PublicBody",
            Schema::Directorship => "Directorship",
            Schema::Employment => "Employment",
            Schema::Membership => "Membership",
            Schema::Representation => "Representation",
            Schema::UnknownLink => "UnknownLink",
            Schema::Ownership => "Ownership",
            Schema::Identification => "Identification",
            Schema::Passport => "Passport",
            Schema::Address => "Address",
            Schema::Family => "Family",
            Schema::Associate => "Associate",
            Schema::Succession => "Succession",
            Schema::Other(name) => name,
        }
    }

    pub fn role(&self) -> SchemaRole {
        match self {
            Schema::Person => SchemaRole::Principal(RecordClass::Person),
            Schema::Organization | Schema::Company | Schema::PublicBody => {
                SchemaRole::Principal(RecordClass::Organization)
            }
            Schema::LegalEntity => SchemaRole::Principal(RecordClass::Legal),
            Schema::Directorship => SchemaRole::Attachment(Bucket::Directorships),
            Schema::Employment => SchemaRole::Attachment(Bucket::Employments),
            Schema::Membership => SchemaRole::Attachment(Bucket::Memberships),
            Schema::Representation => SchemaRole::Attachment(Bucket::Representations),
            Schema::UnknownLink => SchemaRole::Attachment(Bucket::UnknownLinks),
            Schema::Ownership => SchemaRole::Attachment(Bucket::Ownerships),
            Schema::Identification | Schema::Passport => {
                SchemaRole::Attachment(Bucket::Identifications)
            }
            Schema::Address => SchemaRole::Attachment(Bucket::Addresses),
            Schema::Family => SchemaRole::Attachment(Bucket::Families),
            Schema::Associate => SchemaRole::Attachment(Bucket::Associates),
            Schema::Succession => SchemaRole::Deferred,
            Schema::Other(_) => SchemaRole::Unknown,
        }
    }

    pub fn is_passport(&self) -> bool {
        matches!(self, Schema::Passport)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_organization_subtypes_share_record_class() {
        for name in ["Organization", "Company", "PublicBody"] {
            assert_eq!(
                Schema::parse(name).role(),
                SchemaRole::Principal(RecordClass::Organization)
            );
        }
        assert_eq!(
            Schema::parse("LegalEntity").role(),
            SchemaRole::Principal(RecordClass::Legal)
        );
    }

    #[test]
    fn test_passport_is_an_identification() {
        let passport = Schema::parse("Passport");
        assert!(passport.is_passport());
        assert_eq!(passport.role(), SchemaRole::Attachment(Bucket::Identifications));
    }

    #[test]
    fn test_succession_deferred_and_unknown_preserved() {
        assert_eq!(Schema::parse("Succession").role(), SchemaRole::Deferred);

        let vessel = Schema::parse("Vessel");
        assert_eq!(vessel.role(), SchemaRole::Unknown);
        assert_eq!(vessel.to_string(), "Vessel");
    }

    #[test]
    fn test_record_class_labels() {
        assert_eq!(RecordClass::Person.address_label(), "HOME");
        assert_eq!(RecordClass::Organization.name_field(), "NAME_ORG");
        assert_eq!(RecordClass::Legal.record_type(), None);
        assert_eq!(RecordClass::Legal.address_label(), "LEGAL");
    }

    #[test]
    fn test_every_bucket_but_addresses_has_subject() {
        for bucket in Bucket::ALL {
            assert_eq!(
                bucket.subject_property().is_none(),
                bucket == Bucket::Addresses,
                "{}",
                bucket.as_str()
            );
        }
    }
}
