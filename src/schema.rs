diesel::table! {
    dataset_metadata (id) {
        id -> Int4,
        table_name -> Text,
        file_name -> Text,
        file_type -> Text,
        // `columns` would collide with the helper module table! generates.
        #[sql_name = "columns"]
        column_names -> Jsonb,
        row_count -> Int8,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    chats (id) {
        id -> Int4,
        title -> Text,
        dataset_id -> Nullable<Int4>,
        system_prompt -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    messages (id) {
        id -> Int4,
        chat_id -> Int4,
        role -> Text,
        content -> Text,
        metadata -> Nullable<Jsonb>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    app_settings (key) {
        key -> Text,
        value -> Text,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(messages -> chats (chat_id));

diesel::allow_tables_to_appear_in_same_query!(dataset_metadata, chats, messages, app_settings);
