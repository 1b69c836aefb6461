table! {
    authorization_codes (code_hash) {
        code_hash -> Text,
        client_id -> Text,
        user_uuid -> Text,
        user_id -> Int8,
        redirect_uri -> Text,
        scope -> Text,
        state -> Nullable<Text>,
        code_challenge -> Nullable<Text>,
        code_challenge_method -> Nullable<Text>,
        created_at -> Int8,
        expires_at -> Int8,
        used -> Bool,
        used_time -> Nullable<Int8>,
    }
}

table! {
    client_scopes (client_id, scope) {
        client_id -> Text,
        scope -> Text,
    }
}

table! {
    clients (client_id) {
        client_id -> Text,
        secret_hash -> Text,
        name -> Text,
    }
}

table! {
    refresh_tokens (id) {
        id -> Text,
        token_hash -> Text,
        encrypted_token -> Text,
        user_uuid -> Text,
        user_id -> Int8,
        client_id -> Nullable<Text>,
        scope -> Nullable<Text>,
        device_id -> Nullable<Text>,
        ip_address -> Nullable<Text>,
        user_agent -> Nullable<Text>,
        created_at -> Int8,
        expires_at -> Int8,
        last_used_at -> Int8,
        is_revoked -> Bool,
        revoked_at -> Nullable<Int8>,
        revoke_reason -> Nullable<Text>,
    }
}

table! {
    uris (client_id, uri) {
        client_id -> Text,
        uri -> Text,
    }
}

allow_tables_to_appear_in_same_query!(
    authorization_codes,
    client_scopes,
    clients,
    refresh_tokens,
    uris,
);
