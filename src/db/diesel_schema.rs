// Table definitions matching db/schema.rs DDL.

diesel::table! {
    regions (region_key) {
        region_key -> Text,
        state_key -> Text,
        name -> Text,
        area -> Double,
    }
}

diesel::table! {
    subdivisions (subdivision_key) {
        subdivision_key -> Text,
        region_key -> Text,
        name -> Text,
        area -> Double,
    }
}

diesel::table! {
    diseases (disease_key) {
        disease_key -> Text,
        name -> Text,
        code_system -> Text,
        code -> Text,
    }
}

diesel::table! {
    region_stats (region_key) {
        region_key -> Text,
        area -> Double,
        pop -> BigInt,
        pop_male -> BigInt,
        pop_female -> BigInt,
        pop_per_area -> Double,
    }
}

diesel::table! {
    subdivision_stats (subdivision_key) {
        subdivision_key -> Text,
        region_key -> Text,
        area -> Double,
        pop -> BigInt,
        pop_male -> BigInt,
        pop_female -> BigInt,
        pop_per_area -> Double,
    }
}

diesel::table! {
    region_disease_facts (region_key, disease_key) {
        region_key -> Text,
        disease_key -> Text,
        cases -> BigInt,
        cases_male -> BigInt,
        cases_female -> BigInt,
    }
}

diesel::table! {
    subdivision_disease_facts (subdivision_key, disease_key) {
        subdivision_key -> Text,
        disease_key -> Text,
        cases -> BigInt,
        cases_male -> BigInt,
        cases_female -> BigInt,
    }
}

diesel::joinable!(subdivisions -> regions (region_key));

diesel::allow_tables_to_appear_in_same_query!(
    regions,
    subdivisions,
    diseases,
    region_stats,
    subdivision_stats,
    region_disease_facts,
    subdivision_disease_facts,
);
